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

use super::fence::{GpuTimeline, HeadlessFence};
use kestrel_core::gpu::{
    AlignmentRequirements, BufferDescriptor, BufferId, BufferUsage, GpuBackend, MappedRange,
    NativeHandle, ResourceError, SemaphoreId, SemaphoreKind, SwapchainDescriptor, SwapchainId,
};
use kestrel_core::NativeFence;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BLOCK_SIZE: usize = 256;

/// Unit of host storage. Its alignment is the strictest binding alignment a
/// headless buffer can honor.
#[repr(C, align(256))]
#[derive(Clone, Copy)]
struct Block([u8; BLOCK_SIZE]);

/// Host memory standing in for a device buffer.
struct HeadlessBuffer {
    memory: NonNull<Block>,
    blocks: usize,
    size: u64,
    usage: BufferUsage,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for HeadlessBuffer {}

impl HeadlessBuffer {
    fn new(size: u64, usage: BufferUsage) -> Self {
        let blocks = (size as usize).div_ceil(BLOCK_SIZE);
        let storage = vec![Block([0; BLOCK_SIZE]); blocks].into_boxed_slice();
        let raw = Box::into_raw(storage) as *mut Block;
        Self {
            // A boxed slice pointer is never null, even when empty.
            memory: NonNull::new(raw).unwrap_or(NonNull::dangling()),
            blocks,
            size,
            usage,
        }
    }

    fn base(&self) -> NonNull<u8> {
        self.memory.cast()
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        // SAFETY: `memory` and `blocks` come from the boxed slice built in `new`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.memory.as_ptr(),
                self.blocks,
            )));
        }
    }
}

impl std::fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBuffer")
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}

/// A [`GpuBackend`] that runs entirely on the CPU.
///
/// Buffers are host allocations, fences retire when the [`GpuTimeline`] is
/// advanced, and every destruction is recorded so callers can check what was
/// destroyed and when.
#[derive(Debug)]
pub struct HeadlessBackend {
    alignments: AlignmentRequirements,
    timeline: Arc<GpuTimeline>,
    next_id: AtomicUsize,
    buffers: Mutex<HashMap<BufferId, HeadlessBuffer>>,
    semaphores: Mutex<HashMap<SemaphoreId, SemaphoreKind>>,
    swapchains: Mutex<HashMap<SwapchainId, SwapchainDescriptor>>,
    destroyed: Mutex<Vec<NativeHandle>>,
    allocated_bytes: AtomicU64,
    peak_allocated_bytes: AtomicU64,
    fences_created: AtomicUsize,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// Creates a backend reporting the default alignment requirements.
    pub fn new() -> Self {
        Self::with_alignments(AlignmentRequirements::default())
    }

    /// Creates a backend reporting custom alignment requirements.
    pub fn with_alignments(alignments: AlignmentRequirements) -> Self {
        Self {
            alignments,
            timeline: Arc::new(GpuTimeline::new()),
            next_id: AtomicUsize::new(1),
            buffers: Mutex::new(HashMap::new()),
            semaphores: Mutex::new(HashMap::new()),
            swapchains: Mutex::new(HashMap::new()),
            destroyed: Mutex::new(Vec::new()),
            allocated_bytes: AtomicU64::new(0),
            peak_allocated_bytes: AtomicU64::new(0),
            fences_created: AtomicUsize::new(0),
        }
    }

    /// Creates a backend whose every binding requires the same alignment.
    pub fn with_uniform_alignment(alignment: u64) -> Self {
        Self::with_alignments(AlignmentRequirements {
            uniform: alignment,
            storage: alignment,
            vertex: alignment,
            index: alignment,
            indirect: alignment,
            shader_table: alignment,
        })
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The simulated GPU queue.
    pub fn timeline(&self) -> &Arc<GpuTimeline> {
        &self.timeline
    }

    /// Completes every submission issued so far.
    pub fn retire_all(&self) {
        self.timeline.retire_all();
    }

    /// Completes every submission up to and including `serial`.
    pub fn retire_through(&self, serial: u64) {
        self.timeline.retire_through(serial);
    }

    /// Copies `len` bytes out of a buffer.
    pub fn read_bytes(&self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>, ResourceError> {
        let buffers = self.buffers.lock().unwrap();
        let entry = buffers.get(&id).ok_or(ResourceError::NotFound)?;
        let end = offset.checked_add(len).ok_or(ResourceError::OutOfBounds)?;
        if end > entry.size {
            return Err(ResourceError::OutOfBounds);
        }
        // SAFETY: the range was checked against the allocation size above.
        let bytes = unsafe {
            std::slice::from_raw_parts(entry.base().as_ptr().add(offset as usize), len as usize)
        };
        Ok(bytes.to_vec())
    }

    /// Reads `count` values of `T` from a buffer.
    pub fn read_pod<T: bytemuck::Pod>(
        &self,
        id: BufferId,
        offset: u64,
        count: usize,
    ) -> Result<Vec<T>, ResourceError> {
        let stride = std::mem::size_of::<T>();
        let len = count
            .checked_mul(stride)
            .ok_or(ResourceError::OutOfBounds)? as u64;
        let bytes = self.read_bytes(id, offset, len)?;
        if stride == 0 {
            return Ok(vec![T::zeroed(); count]);
        }
        // The offset carries no alignment guarantee for `T`.
        Ok(bytes
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Every handle destroyed so far, in destruction order.
    pub fn destroyed_handles(&self) -> Vec<NativeHandle> {
        self.destroyed.lock().unwrap().clone()
    }

    /// Returns `true` if `handle` was destroyed.
    pub fn was_destroyed(&self, handle: NativeHandle) -> bool {
        self.destroyed.lock().unwrap().contains(&handle)
    }

    /// Number of buffers not yet destroyed.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    /// Number of semaphores not yet destroyed.
    pub fn live_semaphore_count(&self) -> usize {
        self.semaphores.lock().unwrap().len()
    }

    /// The kind of a live semaphore.
    pub fn semaphore_kind(&self, id: SemaphoreId) -> Option<SemaphoreKind> {
        self.semaphores.lock().unwrap().get(&id).copied()
    }

    /// Number of swap chains not yet destroyed.
    pub fn live_swapchain_count(&self) -> usize {
        self.swapchains.lock().unwrap().len()
    }

    /// The descriptor a live swap chain was created with.
    pub fn swapchain_descriptor(&self, id: SwapchainId) -> Option<SwapchainDescriptor> {
        self.swapchains.lock().unwrap().get(&id).copied()
    }

    /// Bytes held by live buffers.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Largest value [`allocated_bytes`](Self::allocated_bytes) ever reached.
    pub fn peak_allocated_bytes(&self) -> u64 {
        self.peak_allocated_bytes.load(Ordering::Relaxed)
    }

    /// Number of driver fences created (recycled fences are not counted twice).
    pub fn fences_created(&self) -> usize {
        self.fences_created.load(Ordering::Relaxed)
    }
}

impl GpuBackend for HeadlessBackend {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = BufferId(self.next());
        let buffer = HeadlessBuffer::new(descriptor.size, descriptor.usage);
        self.buffers.lock().unwrap().insert(id, buffer);

        let total = self
            .allocated_bytes
            .fetch_add(descriptor.size, Ordering::Relaxed)
            + descriptor.size;
        self.peak_allocated_bytes.fetch_max(total, Ordering::Relaxed);

        log::debug!(
            "HeadlessBackend: Created buffer {:?} ({} bytes) with ID: {id:?}",
            descriptor.label.as_deref().unwrap_or("unnamed"),
            descriptor.size
        );
        Ok(id)
    }

    fn map_persistent(&self, id: BufferId) -> Result<MappedRange, ResourceError> {
        let buffers = self.buffers.lock().unwrap();
        let entry = buffers.get(&id).ok_or(ResourceError::NotFound)?;
        if !entry.usage.contains(BufferUsage::MAP_WRITE) {
            return Err(ResourceError::MappingFailed(format!(
                "buffer {id:?} was not created with MAP_WRITE"
            )));
        }
        // SAFETY: the allocation lives until the buffer is destroyed.
        Ok(unsafe { MappedRange::new(entry.base(), entry.size) })
    }

    fn alignment_requirements(&self) -> AlignmentRequirements {
        self.alignments
    }

    fn destroy_native(&self, handle: NativeHandle) -> Result<(), ResourceError> {
        match handle {
            NativeHandle::Buffer(id) => {
                let entry = self
                    .buffers
                    .lock()
                    .unwrap()
                    .remove(&id)
                    .ok_or(ResourceError::NotFound)?;
                self.allocated_bytes
                    .fetch_sub(entry.size, Ordering::Relaxed);
            }
            NativeHandle::Semaphore(id) => {
                if self.semaphores.lock().unwrap().remove(&id).is_none() {
                    return Err(ResourceError::NotFound);
                }
            }
            NativeHandle::Swapchain(id) => {
                if self.swapchains.lock().unwrap().remove(&id).is_none() {
                    return Err(ResourceError::NotFound);
                }
            }
            // Other kinds are never created here; their destruction is only recorded.
            _ => {}
        }
        log::debug!("HeadlessBackend: Destroyed {handle:?}");
        self.destroyed.lock().unwrap().push(handle);
        Ok(())
    }

    fn create_fence(&self) -> Result<Box<dyn NativeFence>, ResourceError> {
        self.fences_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(HeadlessFence::new(self.timeline.clone())))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> Result<SemaphoreId, ResourceError> {
        let id = SemaphoreId(self.next());
        self.semaphores.lock().unwrap().insert(id, kind);
        Ok(id)
    }

    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
    ) -> Result<SwapchainId, ResourceError> {
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.image_count == 0 {
            return Err(ResourceError::BackendError(format!(
                "cannot present {descriptor:?}"
            )));
        }
        let id = SwapchainId(self.next());
        self.swapchains.lock().unwrap().insert(id, *descriptor);
        log::debug!("HeadlessBackend: Created swap chain {id:?} ({descriptor:?})");
        Ok(id)
    }
}
