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

use super::cursor::RingCursor;
use crate::error::TransientMemoryError;
use kestrel_core::gpu::{BufferDescriptor, BufferId, BufferUsage, GpuBackend, NativeHandle};
use kestrel_core::{GpuMemorySettings, ResourceError};
use std::borrow::Cow;
use std::sync::Arc;

/// A range of the device-local ring. Only GPU work reads or writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTransientAllocation {
    /// The ring buffer to bind.
    pub buffer: BufferId,
    /// Byte offset of the range inside `buffer`.
    pub offset: u64,
    /// Size of the range in bytes, rounded up to the ring alignment.
    pub size: u64,
}

/// A frame-cycled ring of device-local memory the CPU never maps.
///
/// Scratch buffers, intermediate compute outputs and other data produced and
/// consumed on the GPU within one frame live here. Without a CPU view there is
/// nothing to alias, so allocations are plain values and the frame is closed
/// directly with [`end_frame`](Self::end_frame).
#[derive(Debug)]
pub struct GpuVisibleRing {
    backend: Arc<dyn GpuBackend>,
    buffer: BufferId,
    cursor: RingCursor,
}

impl GpuVisibleRing {
    /// Creates the device-local ring buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the buffer cannot be created.
    ///
    /// # Panics
    ///
    /// If `frames_in_flight` is outside `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        buffer_size: u64,
        frames_in_flight: usize,
    ) -> Result<Self, ResourceError> {
        let alignment = backend.alignment_requirements().max_alignment();
        let cursor = RingCursor::new("GpuVisibleRing", buffer_size, alignment, frames_in_flight);
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed("GPU transient ring")),
            size: buffer_size,
            usage: BufferUsage::GPU_TRANSIENT,
        })?;
        log::info!("GpuVisibleRing: {buffer_size} bytes, alignment {alignment}");
        Ok(Self {
            backend,
            buffer,
            cursor,
        })
    }

    /// Creates a ring sized and tuned by `settings`.
    pub fn from_settings(
        backend: Arc<dyn GpuBackend>,
        settings: &GpuMemorySettings,
    ) -> Result<Self, ResourceError> {
        let mut ring = Self::new(
            backend,
            settings.gpu_transient_buffer_size,
            settings.frames_in_flight,
        )?;
        ring.cursor
            .set_overcommit_warning_ratio(settings.overcommit_warning_ratio);
        Ok(ring)
    }

    /// Hands out `size` bytes for GPU-only use during the current frame.
    ///
    /// # Errors
    ///
    /// [`TransientMemoryError::OutOfMemory`] if the frames in flight still own
    /// the space.
    ///
    /// # Panics
    ///
    /// If the aligned request is larger than half the ring, or `alignment` is
    /// not a power of two up to the ring alignment.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<GpuTransientAllocation, TransientMemoryError> {
        let (offset, size) = self.cursor.reserve(size, alignment)?;
        Ok(GpuTransientAllocation {
            buffer: self.buffer,
            offset,
            size,
        })
    }

    /// Closes the current frame and returns the bytes it used.
    pub fn end_frame(&self) -> u64 {
        self.cursor.end_frame()
    }

    /// The ring buffer every allocation lives in.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Size of the ring in bytes.
    pub fn buffer_size(&self) -> u64 {
        self.cursor.buffer_size()
    }

    /// Index of the frame being recorded.
    pub fn current_frame(&self) -> u64 {
        self.cursor.current_frame()
    }

    /// Bytes consumed by the last completed frame.
    pub fn last_frame_bytes(&self) -> u64 {
        self.cursor.last_frame_bytes()
    }

    /// Number of allocations refused so far.
    pub fn refused_allocations(&self) -> u64 {
        self.cursor.refused_allocations()
    }
}

impl Drop for GpuVisibleRing {
    fn drop(&mut self) {
        if let Err(e) = self.backend.destroy_native(NativeHandle::Buffer(self.buffer)) {
            log::warn!("GpuVisibleRing: Failed to destroy ring buffer: {e:?}");
        }
    }
}
