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

use super::{
    BufferDescriptor, BufferId, NativeHandle, ResourceError, SemaphoreId, SemaphoreKind,
    SwapchainDescriptor, SwapchainId,
};
use crate::sync::NativeFence;
use std::fmt::Debug;
use std::ptr::NonNull;

/// Minimum offset alignments the device imposes on each kind of binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentRequirements {
    /// Alignment of uniform buffer bindings.
    pub uniform: u64,
    /// Alignment of storage buffer bindings.
    pub storage: u64,
    /// Alignment of vertex buffer bindings.
    pub vertex: u64,
    /// Alignment of index buffer bindings.
    pub index: u64,
    /// Alignment of indirect argument buffers.
    pub indirect: u64,
    /// Alignment of shader binding tables.
    pub shader_table: u64,
}

impl AlignmentRequirements {
    /// The strictest of all the alignments, so one value serves every consumer.
    pub fn max_alignment(&self) -> u64 {
        [
            self.uniform,
            self.storage,
            self.vertex,
            self.index,
            self.indirect,
            self.shader_table,
        ]
        .into_iter()
        .fold(1, u64::max)
    }
}

impl Default for AlignmentRequirements {
    fn default() -> Self {
        Self {
            uniform: 256,
            storage: 256,
            vertex: 4,
            index: 4,
            indirect: 4,
            shader_table: 64,
        }
    }
}

/// A CPU-visible view of a persistently mapped buffer.
///
/// The pointer stays valid until the buffer is destroyed through
/// [`GpuBackend::destroy_native`].
#[derive(Debug, Clone, Copy)]
pub struct MappedRange {
    ptr: NonNull<u8>,
    len: u64,
}

impl MappedRange {
    /// Wraps a mapping returned by the driver.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` writable bytes that stay mapped for as long as the
    /// buffer lives, and nothing else may hold a `&mut` into that memory.
    pub unsafe fn new(ptr: NonNull<u8>, len: u64) -> Self {
        Self { ptr, len }
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: the mapping is plain device-visible memory. Writers only ever touch
// disjoint ranges handed out by the allocators.
unsafe impl Send for MappedRange {}
unsafe impl Sync for MappedRange {}

/// The slice of a graphics device the memory subsystem depends on.
///
/// Implementations must be usable from any recording thread at once.
pub trait GpuBackend: Send + Sync + Debug + 'static {
    /// Creates a new GPU buffer.
    /// ## Arguments
    /// * `descriptor` - A reference to a `BufferDescriptor` containing the buffer configuration.
    /// ## Returns
    /// A `Result` containing the ID of the created buffer or an error if the creation fails.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Maps a buffer created with `BufferUsage::MAP_WRITE` for the rest of its life.
    /// ## Errors
    /// * `ResourceError::MappingFailed` - If the buffer is not host visible.
    fn map_persistent(&self, id: BufferId) -> Result<MappedRange, ResourceError>;

    /// Returns the binding alignments of the device. Queried once at startup.
    fn alignment_requirements(&self) -> AlignmentRequirements;

    /// Immediately destroys a native object.
    ///
    /// Callers are expected to route this through a garbage collector so that the
    /// GPU is done with the object.
    fn destroy_native(&self, handle: NativeHandle) -> Result<(), ResourceError>;

    /// Creates an unsignaled fence.
    fn create_fence(&self) -> Result<Box<dyn NativeFence>, ResourceError>;

    /// Creates a GPU-GPU semaphore of the given kind.
    ///
    /// Timeline semaphores start at value 0.
    fn create_semaphore(&self, kind: SemaphoreKind) -> Result<SemaphoreId, ResourceError>;

    /// Creates a swap chain for the presentation surface.
    /// ## Errors
    /// * `ResourceError::BackendError` - If the surface cannot present with `descriptor`.
    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> Result<SwapchainId, ResourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_alignment_picks_strictest_consumer() {
        let reqs = AlignmentRequirements {
            uniform: 16,
            storage: 32,
            vertex: 4,
            index: 4,
            indirect: 4,
            shader_table: 64,
        };
        assert_eq!(reqs.max_alignment(), 64);
        assert_eq!(AlignmentRequirements::default().max_alignment(), 256);
    }
}
