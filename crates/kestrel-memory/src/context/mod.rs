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

//! The owner of every allocator, collector and factory of one device.
//!
//! A [`GpuMemoryContext`] is built explicitly from a backend and a set of
//! [`GpuMemorySettings`], then shared by `Arc` between the recording threads and
//! the frame-boundary thread.
//!
//! # Frame protocol
//!
//! ```text
//!  frame boundary:      let frame = begin_frame()
//!  recording threads:   frame.allocate_transient / allocate_chunked / enqueue_garbage ...
//!  frame boundary:      attach_frame_fence(submit fence)
//!                       frame.end_frame()
//!                       collect_garbage_for_new_frame()
//!  shutdown:            finish()
//! ```

use crate::chunk::{SubAllocation, TransientChunkPool};
use crate::error::{ChunkPoolError, ContextError, TransientMemoryError};
use crate::gc::FrameGarbageCollector;
use crate::recycle::{FenceFactory, RecycledSemaphore, SemaphoreFactory};
use crate::transient::{
    GpuTransientAllocation, GpuVisibleRing, RingAllocator, StructuredView, TransientAllocation,
    TransientFrame,
};
use bytemuck::Pod;
use kestrel_core::gpu::{GpuBackend, NativeHandle, SemaphoreKind};
use kestrel_core::memory::GpuMemoryStats;
use kestrel_core::telemetry::GpuMemoryStatsProvider;
use kestrel_core::{FenceHandle, GpuMemorySettings, ResourceError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Frame-pipelined GPU memory for one device.
#[derive(Debug)]
pub struct GpuMemoryContext {
    settings: GpuMemorySettings,
    ring: RingAllocator,
    gpu_ring: GpuVisibleRing,
    chunks: TransientChunkPool,
    garbage: FrameGarbageCollector<NativeHandle>,
    fences: FenceFactory,
    semaphores: SemaphoreFactory,
    finished: AtomicBool,
}

impl GpuMemoryContext {
    /// Validates `settings` and creates the transient rings.
    ///
    /// # Errors
    ///
    /// * [`ContextError::Config`] if the settings are inconsistent.
    /// * [`ContextError::Resource`] if a ring buffer cannot be created or mapped.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        settings: GpuMemorySettings,
    ) -> Result<Self, ContextError> {
        settings.validate()?;

        let ring = RingAllocator::from_settings(backend.clone(), &settings)?;
        let gpu_ring = GpuVisibleRing::from_settings(backend.clone(), &settings)?;
        let chunks = TransientChunkPool::from_settings(backend.clone(), &settings);
        let garbage = FrameGarbageCollector::for_backend(backend.clone(), settings.frames_in_flight);
        let fences = FenceFactory::new(backend.clone(), settings.recycler);
        let semaphores = SemaphoreFactory::new(backend, settings.recycler);

        log::info!(
            "GpuMemoryContext: ready ({} frames in flight, {} byte ring, {} byte chunks)",
            settings.frames_in_flight,
            settings.transient_buffer_size,
            settings.chunk_size
        );

        Ok(Self {
            settings,
            ring,
            gpu_ring,
            chunks,
            garbage,
            fences,
            semaphores,
            finished: AtomicBool::new(false),
        })
    }

    /// The settings the context was built with.
    pub fn settings(&self) -> &GpuMemorySettings {
        &self.settings
    }

    /// The transient ring.
    pub fn ring(&self) -> &RingAllocator {
        &self.ring
    }

    /// The device-local transient ring.
    pub fn gpu_ring(&self) -> &GpuVisibleRing {
        &self.gpu_ring
    }

    /// The chunk pool.
    pub fn chunk_pool(&self) -> &TransientChunkPool {
        &self.chunks
    }

    /// The collector destroying native objects.
    pub fn garbage(&self) -> &FrameGarbageCollector<NativeHandle> {
        &self.garbage
    }

    // --- Transient memory ---

    /// Opens the frame being recorded on both transient rings.
    ///
    /// # Panics
    ///
    /// If the previous frame is still open.
    pub fn begin_frame(&self) -> FrameScope<'_> {
        FrameScope {
            transient: self.ring.begin_frame(),
            gpu_ring: &self.gpu_ring,
            gpu_closed: false,
        }
    }

    // --- Deferred destruction ---

    /// Queues a native object for destruction once the current frame retires.
    ///
    /// # Panics
    ///
    /// If the context already finished: nothing would ever destroy the object.
    pub fn enqueue_garbage(&self, handle: NativeHandle) {
        if self.is_finished() {
            fatal!("GpuMemoryContext: {handle:?} enqueued for destruction after finish");
        }
        self.garbage.enqueue_native(handle);
    }

    /// Associates the fence of a submission with the current frame.
    ///
    /// Call once per queue the frame was submitted to.
    pub fn attach_frame_fence(&self, fence: FenceHandle) {
        self.chunks.attach_fence(fence.clone());
        self.garbage.attach_fence(fence);
    }

    /// Starts a new garbage frame, disposing of what retired.
    ///
    /// Chunk slots are returned before native objects are destroyed, so chunks
    /// emptied this frame can be trimmed right after.
    ///
    /// # Returns
    ///
    /// The number of items disposed.
    pub fn collect_garbage_for_new_frame(&self) -> usize {
        let freed_slots = self.chunks.begin_frame_and_collect();
        let destroyed = self.garbage.begin_frame_and_collect();
        freed_slots + destroyed
    }

    // --- Chunked memory ---

    /// Hands out a slot of at least `size` bytes from the chunk pool.
    ///
    /// # Errors
    ///
    /// Returns the [`ChunkPoolError`] for invalid sizes or backend failures.
    ///
    /// # Panics
    ///
    /// If the chunk ceiling is reached: `max_chunk_count` is too low for the
    /// workload.
    pub fn allocate_chunked(&self, size: u64) -> Result<SubAllocation, ChunkPoolError> {
        match self.chunks.allocate(size) {
            Err(ChunkPoolError::ChunkLimitReached { limit, requested }) => {
                fatal!(
                    "GpuMemoryContext: chunk limit of {limit} reached while allocating {requested} bytes"
                );
            }
            other => other,
        }
    }

    /// Returns a slot to its chunk once the current frame retires.
    ///
    /// # Panics
    ///
    /// If the context already finished.
    pub fn deferred_free_chunked(&self, allocation: SubAllocation) {
        if self.is_finished() {
            fatal!(
                "GpuMemoryContext: chunk slot {:?} freed after finish",
                allocation.chunk()
            );
        }
        self.chunks.deferred_free(allocation);
    }

    /// Releases chunks that no longer hold any live slot.
    pub fn trim_chunks(&self) -> usize {
        self.chunks.trim_empty_chunks(&self.garbage)
    }

    // --- Synchronization objects ---

    /// Returns an unsignaled fence, recycled when possible.
    pub fn new_fence(&self) -> Result<FenceHandle, ResourceError> {
        self.fences.new_fence()
    }

    /// Returns a semaphore of `kind` no submission is using.
    pub fn new_semaphore(&self, kind: SemaphoreKind) -> Result<RecycledSemaphore, ResourceError> {
        self.semaphores.new_semaphore(kind)
    }

    /// Gives a semaphore back; it is reused once `fence` signals.
    pub fn release_semaphore(&self, semaphore: RecycledSemaphore, fence: FenceHandle) {
        self.semaphores.release_semaphore(semaphore, fence);
    }

    // --- Lifecycle ---

    /// Snapshot of the memory usage.
    pub fn stats(&self) -> GpuMemoryStats {
        let mut stats = GpuMemoryStats {
            ring_capacity_bytes: self.ring.buffer_size(),
            ring_bytes_last_frame: self.ring.last_frame_bytes(),
            ring_peak_frame_bytes: self.ring.peak_frame_bytes(),
            ring_refused_allocations: self.ring.refused_allocations(),
            ring_overcommitted_frames: self.ring.overcommitted_frames(),
            gpu_ring_capacity_bytes: self.gpu_ring.buffer_size(),
            gpu_ring_bytes_last_frame: self.gpu_ring.last_frame_bytes(),
            gpu_ring_refused_allocations: self.gpu_ring.refused_allocations(),
            chunk_count: self.chunks.chunk_count(),
            chunk_reserved_bytes: self.chunks.reserved_bytes(),
            live_sub_allocations: self.chunks.live_allocations(),
            live_sub_allocation_bytes: self.chunks.live_bytes(),
            pending_garbage: self.garbage.pending_count() + self.chunks.pending_frees(),
            cached_fences: self.fences.cached_count(),
            cached_semaphores: self.semaphores.cached_count(),
            ..Default::default()
        };
        stats.calculate_derived_metrics();
        stats
    }

    /// Waits for every frame in flight and disposes of all pending garbage.
    ///
    /// Called automatically when the context is dropped. Later calls are no-ops.
    ///
    /// # Panics
    ///
    /// If a fence does not signal within `shutdown_fence_timeout_ms`.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let timeout = self.settings.shutdown_fence_timeout();
        let freed_slots = self.chunks.finish(timeout);
        let destroyed = self.garbage.finish(timeout);
        log::info!(
            "GpuMemoryContext: finished ({freed_slots} chunk slots returned, {destroyed} objects destroyed)"
        );
    }

    /// Returns `true` once [`finish`](Self::finish) ran.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// The frame being recorded, across the mapped and the device-local ring.
///
/// Returned by [`GpuMemoryContext::begin_frame`]. Transient allocations borrow
/// the scope, so they are gone by the time [`end_frame`](Self::end_frame)
/// consumes it. Dropping the scope ends the frame too.
#[derive(Debug)]
pub struct FrameScope<'c> {
    transient: TransientFrame<'c>,
    gpu_ring: &'c GpuVisibleRing,
    gpu_closed: bool,
}

impl FrameScope<'_> {
    /// Hands out `size` bytes of frame-lifetime memory.
    ///
    /// # Errors
    ///
    /// See [`TransientFrame::allocate`].
    pub fn allocate_transient(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<TransientAllocation<'_>, TransientMemoryError> {
        self.transient.allocate(size, alignment)
    }

    /// Hands out room for `count` values of `T`.
    pub fn allocate_structured<T: Pod>(
        &self,
        count: usize,
    ) -> Result<StructuredView<'_, T>, TransientMemoryError> {
        self.transient.allocate_structured(count)
    }

    /// Hands out a copy of `data`.
    pub fn allocate_copy<T: Pod>(
        &self,
        data: &[T],
    ) -> Result<TransientAllocation<'_>, TransientMemoryError> {
        self.transient.allocate_copy(data)
    }

    /// Hands out `size` bytes of device-local memory for GPU work of this frame.
    ///
    /// # Errors
    ///
    /// See [`GpuVisibleRing::allocate`].
    pub fn allocate_gpu_transient(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<GpuTransientAllocation, TransientMemoryError> {
        self.gpu_ring.allocate(size, alignment)
    }

    /// Index of this frame.
    pub fn index(&self) -> u64 {
        self.transient.index()
    }

    /// Closes the frame on both rings.
    ///
    /// # Returns
    ///
    /// The bytes the mapped ring consumed during the frame.
    pub fn end_frame(mut self) -> u64 {
        self.close_gpu_ring();
        self.transient.close()
    }

    fn close_gpu_ring(&mut self) {
        if !self.gpu_closed {
            self.gpu_closed = true;
            self.gpu_ring.end_frame();
        }
    }
}

impl Drop for FrameScope<'_> {
    fn drop(&mut self) {
        self.close_gpu_ring();
    }
}

impl GpuMemoryStatsProvider for GpuMemoryContext {
    fn memory_stats(&self) -> GpuMemoryStats {
        self.stats()
    }
}

impl Drop for GpuMemoryContext {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_infra::HeadlessBackend;

    fn settings() -> GpuMemorySettings {
        GpuMemorySettings {
            transient_buffer_size: 4096,
            gpu_transient_buffer_size: 2048,
            frames_in_flight: 2,
            chunk_size: 1024,
            min_class_size: 64,
            max_chunk_count: 2,
            shutdown_fence_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn context() -> (Arc<HeadlessBackend>, GpuMemoryContext) {
        let backend = Arc::new(HeadlessBackend::new());
        let context = GpuMemoryContext::new(backend.clone(), settings()).unwrap();
        (backend, context)
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let backend = Arc::new(HeadlessBackend::new());
        let result = GpuMemoryContext::new(
            backend,
            GpuMemorySettings {
                frames_in_flight: 0,
                ..settings()
            },
        );
        assert!(matches!(result, Err(ContextError::Config(_))));
    }

    #[test]
    fn frame_fence_guards_both_collectors() {
        let (backend, context) = context();
        let slot = context.allocate_chunked(100).unwrap();
        let buffer = slot.buffer();
        context.deferred_free_chunked(slot);

        let fence = context.new_fence().unwrap();
        context.attach_frame_fence(fence.clone());
        assert_eq!(context.garbage().current_fence_count(), 1);
        drop(fence);

        context.collect_garbage_for_new_frame();
        assert_eq!(context.collect_garbage_for_new_frame(), 0);
        assert_eq!(context.stats().live_sub_allocations, 1);

        backend.retire_all();
        context.collect_garbage_for_new_frame();
        assert_eq!(context.collect_garbage_for_new_frame(), 1);
        assert_eq!(context.stats().live_sub_allocations, 0);

        assert_eq!(context.trim_chunks(), 1);
        assert!(!backend.was_destroyed(NativeHandle::Buffer(buffer)));
    }

    #[test]
    #[should_panic(expected = "chunk limit of 2 reached")]
    fn chunk_ceiling_is_fatal_at_the_facade() {
        let (_backend, context) = context();
        let _a = context.allocate_chunked(1024).unwrap();
        let _b = context.allocate_chunked(1024).unwrap();
        let _ = context.allocate_chunked(1024);
    }

    #[test]
    fn stats_cover_every_component() {
        let (_backend, context) = context();
        let frame = context.begin_frame();
        let _ = frame.allocate_transient(100, 4).unwrap();
        let _ = frame.allocate_gpu_transient(300, 4).unwrap();
        frame.end_frame();
        let slot = context.allocate_chunked(64).unwrap();

        let stats = context.stats();
        assert_eq!(stats.ring_capacity_bytes, 4096);
        assert_eq!(stats.ring_bytes_last_frame, 256);
        assert_eq!(stats.gpu_ring_capacity_bytes, 2048);
        assert_eq!(stats.gpu_ring_bytes_last_frame, 512);
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.live_sub_allocation_bytes, 64);
        assert_eq!(stats.reserved_bytes(), 4096 + 2048 + 1024);
        assert!((stats.ring_frame_utilization - 0.0625).abs() < f64::EPSILON);

        context.deferred_free_chunked(slot);
        assert_eq!(context.stats().pending_garbage, 1);
    }

    #[test]
    fn finish_runs_once() {
        let (backend, context) = context();
        let semaphore = backend.create_semaphore(SemaphoreKind::Binary).unwrap();
        context.enqueue_garbage(NativeHandle::Semaphore(semaphore));
        context.attach_frame_fence(context.new_fence().unwrap());
        backend.retire_all();

        context.finish();
        assert!(context.is_finished());
        assert_eq!(backend.live_semaphore_count(), 0);
        context.finish();
        drop(context);
        assert_eq!(backend.live_buffer_count(), 0);
    }

    #[test]
    fn dropping_the_scope_ends_both_rings() {
        let (_backend, context) = context();
        {
            let frame = context.begin_frame();
            frame.allocate_gpu_transient(16, 16).unwrap();
            assert_eq!(frame.index(), 0);
        }
        assert_eq!(context.ring().current_frame(), 1);
        assert_eq!(context.gpu_ring().current_frame(), 1);

        let frame = context.begin_frame();
        assert_eq!(frame.index(), 1);
        frame.end_frame();
        assert_eq!(context.gpu_ring().current_frame(), 2);
    }

    #[test]
    #[should_panic(expected = "enqueued for destruction after finish")]
    fn garbage_after_finish_is_fatal() {
        let (backend, context) = context();
        context.finish();
        let semaphore = backend.create_semaphore(SemaphoreKind::Binary).unwrap();
        context.enqueue_garbage(NativeHandle::Semaphore(semaphore));
    }

    #[test]
    #[should_panic(expected = "freed after finish")]
    fn chunk_free_after_finish_is_fatal() {
        let (_backend, context) = context();
        let slot = context.allocate_chunked(64).unwrap();
        context.finish();
        context.deferred_free_chunked(slot);
    }
}
