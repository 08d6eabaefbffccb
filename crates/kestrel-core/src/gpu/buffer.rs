// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines data structures related to GPU buffer resources.

use crate::kestrel_bitflags;
use std::borrow::Cow;

kestrel_bitflags! {
    /// A set of flags describing the allowed usages of a [`BufferId`].
    ///
    /// The backend uses them to pick the memory heap. Only buffers created with
    /// [`BufferUsage::MAP_WRITE`] can be persistently mapped.
    pub struct BufferUsage: u32 {
        /// The buffer can be mapped for writing on the CPU.
        const MAP_WRITE = 1 << 0;
        /// The buffer can be used as the source of a copy operation.
        const COPY_SRC = 1 << 1;
        /// The buffer can be used as the destination of a copy operation.
        const COPY_DST = 1 << 2;

        /// The buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 3;
        /// The buffer can be bound as an index buffer.
        const INDEX = 1 << 4;
        /// The buffer can be bound as a uniform buffer.
        const UNIFORM = 1 << 5;

        /// The buffer can be bound as a storage buffer.
        const STORAGE = 1 << 6;
        /// The buffer can be used for indirect draw or dispatch commands.
        const INDIRECT = 1 << 7;
        /// The buffer can hold ray-tracing shader binding tables.
        const SHADER_TABLE = 1 << 8;

        /// Every usage a GPU-only transient range may be bound as.
        const GPU_TRANSIENT = Self::COPY_SRC.bits()
            | Self::COPY_DST.bits()
            | Self::VERTEX.bits()
            | Self::INDEX.bits()
            | Self::UNIFORM.bits()
            | Self::STORAGE.bits()
            | Self::INDIRECT.bits()
            | Self::SHADER_TABLE.bits();
        /// Every usage a CPU-written transient range may be bound as.
        const TRANSIENT = Self::GPU_TRANSIENT.bits() | Self::MAP_WRITE.bits();
    }
}

/// A descriptor used to create a [`BufferId`].
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

/// An opaque handle to a GPU buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);
