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
use super::{StructuredView, TransientAllocation};
use crate::error::TransientMemoryError;
use bytemuck::Pod;
use kestrel_core::gpu::{
    BufferDescriptor, BufferId, BufferUsage, GpuBackend, MappedRange, NativeHandle,
};
use kestrel_core::{GpuMemorySettings, ResourceError};
use std::borrow::Cow;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A lock-free bump allocator over one persistently mapped buffer, reused
/// cyclically across frames.
///
/// The allocator remembers where each frame in flight started and refuses any
/// request that would run over the oldest of them, so a range is never handed
/// out again before the GPU had `frames_in_flight` frames to consume it.
///
/// # Architecture
///
/// ```text
///  frame start:   F-2          F-1          F (current)
///  cursor:  ------|============|============|=======>
///                 ^ oldest in flight                 ^ write cursor
///  every allocation must end before (oldest in flight + buffer size)
/// ```
///
/// Allocations are made through the [`TransientFrame`] returned by
/// [`begin_frame`](Self::begin_frame) and borrow it, so none of them can outlive
/// the frame that owns its range. Only one frame is open at a time.
#[derive(Debug)]
pub struct RingAllocator {
    backend: Arc<dyn GpuBackend>,
    buffer: BufferId,
    mapping: MappedRange,
    cursor: RingCursor,
    frame_open: AtomicBool,
}

impl RingAllocator {
    /// Creates the ring buffer and maps it.
    ///
    /// The ring alignment is the strictest alignment the backend reports for any
    /// kind of binding, so every allocation can be bound as anything.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the buffer cannot be created or mapped.
    ///
    /// # Panics
    ///
    /// If `frames_in_flight` is outside `1..=MAX_FRAMES_IN_FLIGHT` or the backend
    /// reports an alignment that is not a power of two.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        buffer_size: u64,
        frames_in_flight: usize,
    ) -> Result<Self, ResourceError> {
        let alignment = backend.alignment_requirements().max_alignment();
        let cursor = RingCursor::new("RingAllocator", buffer_size, alignment, frames_in_flight);

        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(Cow::Borrowed("Transient ring")),
            size: buffer_size,
            usage: BufferUsage::TRANSIENT,
        })?;
        let mapping = match backend.map_persistent(buffer) {
            Ok(mapping) => mapping,
            Err(e) => {
                if let Err(destroy_err) = backend.destroy_native(NativeHandle::Buffer(buffer)) {
                    log::warn!("RingAllocator: Failed to destroy unmappable buffer: {destroy_err:?}");
                }
                return Err(e);
            }
        };

        log::info!(
            "RingAllocator: {buffer_size} bytes, alignment {alignment}, {frames_in_flight} frames in flight"
        );

        Ok(Self {
            backend,
            buffer,
            mapping,
            cursor,
            frame_open: AtomicBool::new(false),
        })
    }

    /// Creates a ring sized and tuned by `settings`.
    pub fn from_settings(
        backend: Arc<dyn GpuBackend>,
        settings: &GpuMemorySettings,
    ) -> Result<Self, ResourceError> {
        Ok(Self::new(
            backend,
            settings.transient_buffer_size,
            settings.frames_in_flight,
        )?
        .with_overcommit_warning_ratio(settings.overcommit_warning_ratio))
    }

    /// Sets the share of a frame's fair share above which `end_frame` warns.
    pub fn with_overcommit_warning_ratio(mut self, ratio: f64) -> Self {
        self.cursor.set_overcommit_warning_ratio(ratio);
        self
    }

    /// Opens the frame being recorded.
    ///
    /// # Panics
    ///
    /// If the previous frame is still open, or was leaked instead of ended.
    pub fn begin_frame(&self) -> TransientFrame<'_> {
        if self.frame_open.swap(true, Ordering::AcqRel) {
            fatal!(
                "RingAllocator: frame {} is still open",
                self.cursor.current_frame()
            );
        }
        TransientFrame {
            ring: self,
            closed: false,
        }
    }

    fn allocate(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<TransientAllocation<'_>, TransientMemoryError> {
        let (offset, aligned) = self.cursor.reserve(size, alignment)?;
        // SAFETY: `offset + aligned <= buffer_size`, and the cursor never hands the
        // range out again while a frame that could use it is in flight.
        unsafe {
            let ptr = NonNull::new_unchecked(self.mapping.as_ptr().add(offset as usize));
            Ok(TransientAllocation::new(self.buffer, offset, aligned, ptr))
        }
    }

    /// Returns `true` while a [`TransientFrame`] is open.
    pub fn is_frame_open(&self) -> bool {
        self.frame_open.load(Ordering::Acquire)
    }

    /// The ring buffer every allocation lives in.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Size of the ring in bytes.
    pub fn buffer_size(&self) -> u64 {
        self.cursor.buffer_size()
    }

    /// Alignment of every offset handed out.
    pub fn alignment(&self) -> u64 {
        self.cursor.alignment()
    }

    /// Number of frames the ring keeps out of reach.
    pub fn frames_in_flight(&self) -> usize {
        self.cursor.frames_in_flight()
    }

    /// Index of the frame being recorded.
    pub fn current_frame(&self) -> u64 {
        self.cursor.current_frame()
    }

    /// Bytes consumed by the last completed frame.
    pub fn last_frame_bytes(&self) -> u64 {
        self.cursor.last_frame_bytes()
    }

    /// Largest per-frame usage seen so far.
    pub fn peak_frame_bytes(&self) -> u64 {
        self.cursor.peak_frame_bytes()
    }

    /// Number of allocations refused so far.
    pub fn refused_allocations(&self) -> u64 {
        self.cursor.refused_allocations()
    }

    /// Number of frames that used more than the warning share of their fair share.
    pub fn overcommitted_frames(&self) -> u64 {
        self.cursor.overcommitted_frames()
    }
}

impl Drop for RingAllocator {
    fn drop(&mut self) {
        if let Err(e) = self.backend.destroy_native(NativeHandle::Buffer(self.buffer)) {
            log::warn!("RingAllocator: Failed to destroy ring buffer: {e:?}");
        }
    }
}

/// The open frame of a [`RingAllocator`].
///
/// Recording threads share it by reference and allocate concurrently. Ending
/// the frame consumes it, which the borrow checker only allows once every
/// allocation made through it is gone. Dropping it ends the frame as well.
#[derive(Debug)]
pub struct TransientFrame<'r> {
    ring: &'r RingAllocator,
    closed: bool,
}

impl TransientFrame<'_> {
    /// Hands out `size` bytes, aligned to the ring alignment.
    ///
    /// `alignment` is what the caller needs; it must be a power of two no larger
    /// than [`RingAllocator::alignment`], which every offset already satisfies.
    ///
    /// # Errors
    ///
    /// [`TransientMemoryError::OutOfMemory`] if the frames in flight still own
    /// the space. The cursor does not move in that case.
    ///
    /// # Panics
    ///
    /// If the aligned request is larger than half the ring, or `alignment` is
    /// invalid. Both are configuration errors.
    pub fn allocate(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<TransientAllocation<'_>, TransientMemoryError> {
        self.ring.allocate(size, alignment)
    }

    /// Allocates room for `count` values of `T` and returns a typed view on it.
    ///
    /// # Panics
    ///
    /// If `count` values of `T` do not fit in a `u64`.
    pub fn allocate_structured<T: Pod>(
        &self,
        count: usize,
    ) -> Result<StructuredView<'_, T>, TransientMemoryError> {
        let Some(size) = count.checked_mul(std::mem::size_of::<T>()) else {
            fatal!(
                "RingAllocator: {count} elements of {} bytes overflow the address space",
                std::mem::size_of::<T>()
            );
        };
        let allocation = self.allocate(size as u64, self.ring.alignment())?;
        Ok(StructuredView::with_len(allocation, count))
    }

    /// Allocates a range and fills it with `data`.
    pub fn allocate_copy<T: Pod>(
        &self,
        data: &[T],
    ) -> Result<TransientAllocation<'_>, TransientMemoryError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut allocation = self.allocate(bytes.len() as u64, self.ring.alignment())?;
        allocation.write_bytes(0, bytes);
        Ok(allocation)
    }

    /// Index of this frame.
    pub fn index(&self) -> u64 {
        self.ring.current_frame()
    }

    /// Closes the frame.
    ///
    /// Call from the frame-boundary thread once recording threads are done.
    ///
    /// # Returns
    ///
    /// The number of bytes consumed by the frame, abandoned tails included.
    pub fn end_frame(mut self) -> u64 {
        self.close()
    }

    pub(crate) fn close(&mut self) -> u64 {
        if self.closed {
            return 0;
        }
        self.closed = true;
        let used = self.ring.cursor.end_frame();
        self.ring.frame_open.store(false, Ordering::Release);
        used
    }
}

impl Drop for TransientFrame<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_infra::HeadlessBackend;

    fn ring(size: u64, alignment: u64, frames: usize) -> (Arc<HeadlessBackend>, RingAllocator) {
        let backend = Arc::new(HeadlessBackend::with_uniform_alignment(alignment));
        let ring = RingAllocator::new(backend.clone(), size, frames).unwrap();
        (backend, ring)
    }

    #[test]
    fn allocations_are_aligned_and_sequential() {
        let (_backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        let a = frame.allocate(1, 1).unwrap();
        let b = frame.allocate(20, 4).unwrap();
        let c = frame.allocate(16, 16).unwrap();
        assert_eq!((a.offset(), a.size()), (0, 16));
        assert_eq!((b.offset(), b.size()), (16, 32));
        assert_eq!((c.offset(), c.size()), (48, 16));
        assert_eq!(a.buffer(), ring.buffer());
    }

    #[test]
    fn straddling_allocation_restarts_at_the_boundary() {
        let (_backend, ring) = ring(1024, 16, 1);
        let frame = ring.begin_frame();
        assert_eq!(frame.allocate(400, 16).unwrap().offset(), 0);
        assert_eq!(frame.allocate(400, 16).unwrap().offset(), 400);
        assert_eq!(frame.end_frame(), 800);

        let frame = ring.begin_frame();
        assert_eq!(frame.allocate(400, 16).unwrap().offset(), 0);
        // The abandoned tail is charged to the frame.
        assert_eq!(frame.end_frame(), 224 + 400);
    }

    #[test]
    fn refused_request_leaves_the_cursor_alone() {
        let (_backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        frame.allocate(512, 16).unwrap();
        frame.allocate(512, 16).unwrap();
        assert_eq!(
            frame.allocate(16, 16).unwrap_err(),
            TransientMemoryError::OutOfMemory {
                requested: 16,
                available: 0
            }
        );
        frame.end_frame();

        // Frame 0 is still in flight while frame 1 records.
        let frame = ring.begin_frame();
        assert!(frame.allocate(16, 16).is_err());
        frame.end_frame();

        let frame = ring.begin_frame();
        assert_eq!(frame.allocate(16, 16).unwrap().offset(), 0);
        assert_eq!(ring.refused_allocations(), 2);
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        let (_backend, ring) = ring(1024, 16, 2);
        assert_eq!(
            ring.begin_frame().allocate(0, 16).unwrap_err(),
            TransientMemoryError::ZeroSized
        );
    }

    #[test]
    #[should_panic(expected = "the ring is too small")]
    fn request_over_half_the_ring_is_fatal() {
        let (_backend, ring) = ring(1024, 16, 3);
        let _ = ring.begin_frame().allocate(513, 16);
    }

    #[test]
    #[should_panic(expected = "the ring is too small")]
    fn request_overflowing_the_alignment_is_fatal() {
        let (_backend, ring) = ring(1024, 16, 3);
        let _ = ring.begin_frame().allocate(u64::MAX - 3, 1);
    }

    #[test]
    #[should_panic(expected = "overflow the address space")]
    fn structured_request_overflowing_usize_is_fatal() {
        let (_backend, ring) = ring(1024, 16, 3);
        let _ = ring.begin_frame().allocate_structured::<[u64; 4]>(usize::MAX / 8);
    }

    #[test]
    #[should_panic(expected = "is not a power of two up to")]
    fn alignment_above_the_ring_alignment_is_fatal() {
        let (_backend, ring) = ring(1024, 16, 3);
        let _ = ring.begin_frame().allocate(16, 64);
    }

    #[test]
    fn ring_alignment_is_the_strictest_backend_alignment() {
        let backend = Arc::new(HeadlessBackend::new());
        let ring = RingAllocator::new(backend, 4096, 2).unwrap();
        assert_eq!(ring.alignment(), 256);
    }

    #[test]
    fn allocate_copy_fills_the_range() {
        let (backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        frame.allocate(16, 16).unwrap();
        let data = [1.0f32, 2.0, 3.0];
        let alloc = frame.allocate_copy(&data).unwrap();
        assert_eq!(alloc.offset(), 16);
        assert_eq!(
            backend.read_pod::<f32>(ring.buffer(), alloc.offset(), 3).unwrap(),
            data.to_vec()
        );
    }

    #[test]
    fn structured_view_writes_elements() {
        let (backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        let mut view = frame.allocate_structured::<[u32; 3]>(4).unwrap();
        assert_eq!(view.len(), 4);
        view.write_slice(&[[1, 2, 3], [4, 5, 6]]);
        view.write(3, [7, 8, 9]);

        let offset = view.allocation().offset();
        let values = backend
            .read_pod::<[u32; 3]>(ring.buffer(), offset, 4)
            .unwrap();
        assert_eq!(values, vec![[1, 2, 3], [4, 5, 6], [0, 0, 0], [7, 8, 9]]);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn writing_past_the_allocation_panics() {
        let (_backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        let mut alloc = frame.allocate(16, 16).unwrap();
        alloc.write_bytes(8, &[0u8; 9]);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn write_offset_near_u64_max_panics() {
        let (_backend, ring) = ring(1024, 16, 2);
        let frame = ring.begin_frame();
        let mut alloc = frame.allocate(16, 16).unwrap();
        alloc.write_bytes(u64::MAX, &[0u8; 2]);
    }

    #[test]
    fn end_frame_tracks_usage_and_peak() {
        let (_backend, ring) = ring(4096, 16, 2);
        let frame = ring.begin_frame();
        frame.allocate(100, 16).unwrap();
        assert_eq!(frame.end_frame(), 112);
        let frame = ring.begin_frame();
        frame.allocate(32, 16).unwrap();
        assert_eq!(frame.end_frame(), 32);
        assert_eq!(ring.last_frame_bytes(), 32);
        assert_eq!(ring.peak_frame_bytes(), 112);
        assert_eq!(ring.current_frame(), 2);
    }

    #[test]
    fn concurrent_allocations_do_not_overlap() {
        let (_backend, ring) = ring(64 * 1024, 16, 2);
        let frame = ring.begin_frame();
        let mut ranges: Vec<(u64, u64)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let frame = &frame;
                    s.spawn(move || {
                        (0..100)
                            .map(|i| {
                                let size = (16 + (t * 100 + i) % 48) as u64;
                                let a = frame.allocate(size, 16).unwrap();
                                (a.offset(), a.offset() + a.size())
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
        }
    }

    #[test]
    #[should_panic(expected = "is still open")]
    fn opening_a_second_frame_is_fatal() {
        let (_backend, ring) = ring(1024, 16, 2);
        let _first = ring.begin_frame();
        let _second = ring.begin_frame();
    }

    #[test]
    #[should_panic(expected = "is still open")]
    fn leaked_frame_is_never_closed() {
        let (_backend, ring) = ring(1024, 16, 2);
        std::mem::forget(ring.begin_frame());
        let _ = ring.begin_frame();
    }

    #[test]
    fn dropping_a_frame_ends_it() {
        let (_backend, ring) = ring(1024, 16, 2);
        {
            let frame = ring.begin_frame();
            frame.allocate(100, 16).unwrap();
            assert!(ring.is_frame_open());
        }
        assert!(!ring.is_frame_open());
        assert_eq!(ring.current_frame(), 1);
        assert_eq!(ring.last_frame_bytes(), 112);
    }

    #[test]
    fn dropping_the_ring_destroys_its_buffer() {
        let (backend, ring) = ring(1024, 16, 2);
        let buffer = ring.buffer();
        drop(ring);
        assert!(backend.was_destroyed(NativeHandle::Buffer(buffer)));
    }
}
