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

use crate::error::ChunkPoolError;
use crate::gc::{Disposer, FrameGarbageCollector};
use kestrel_core::gpu::{
    BufferDescriptor, BufferId, BufferUsage, GarbageCategory, GpuBackend, NativeHandle,
};
use kestrel_core::{FenceHandle, GpuMemorySettings, MAX_FRAMES_IN_FLIGHT};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Index of a chunk inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId(pub u32);

/// A slot carved out of a chunk.
///
/// Not `Clone`: a sub-allocation is given back exactly once, through
/// [`TransientChunkPool::deferred_free`].
#[derive(Debug, PartialEq, Eq)]
pub struct SubAllocation {
    chunk: ChunkId,
    buffer: BufferId,
    offset: u64,
    size: u64,
    class: u8,
}

impl SubAllocation {
    /// The chunk the slot belongs to.
    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// The buffer to bind.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Byte offset of the slot inside [`buffer`](Self::buffer).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the slot, the request rounded up to its size class.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Index of the size class.
    pub fn class(&self) -> u8 {
        self.class
    }
}

#[derive(Debug)]
struct Chunk {
    buffer: BufferId,
    class: usize,
    slot_size: u64,
    free_slots: Vec<u32>,
    slot_count: u32,
}

impl Chunk {
    fn live_slots(&self) -> u32 {
        self.slot_count - self.free_slots.len() as u32
    }
}

#[derive(Debug)]
struct PoolState {
    /// Chunk slab; trimmed chunks leave a hole that the next chunk reuses.
    chunks: Vec<Option<Chunk>>,
    /// Per size class, the chunks serving it.
    class_chunks: Vec<Vec<u32>>,
    live_allocations: usize,
    live_bytes: u64,
}

impl PoolState {
    fn chunk_count(&self) -> usize {
        self.chunks.iter().flatten().count()
    }
}

/// Returns released slots to their chunk once their frame retired.
struct ChunkReleaser {
    state: Arc<Mutex<PoolState>>,
}

impl Disposer<SubAllocation> for ChunkReleaser {
    fn dispose(&self, _category: GarbageCategory, item: SubAllocation) {
        let mut state = self.state.lock();
        let Some(chunk) = state
            .chunks
            .get_mut(item.chunk.0 as usize)
            .and_then(Option::as_mut)
        else {
            log::error!("TransientChunkPool: release into unknown chunk {:?}", item.chunk);
            return;
        };
        let slot = (item.offset / chunk.slot_size) as u32;
        debug_assert!(!chunk.free_slots.contains(&slot), "slot {slot} freed twice");
        chunk.free_slots.push(slot);
        state.live_allocations -= 1;
        state.live_bytes -= item.size;
    }
}

/// A segregated-size allocator over large GPU chunks.
///
/// Requests are rounded up to a power-of-two size class between
/// `min_class_size` and `chunk_size`. Each chunk serves one class and is sliced
/// into equal slots; chunks are created on demand up to `max_chunk_count`.
/// Freed slots go through the pool's own garbage collector and are reusable
/// once the frame that freed them retired.
#[derive(Debug)]
pub struct TransientChunkPool {
    backend: Arc<dyn GpuBackend>,
    state: Arc<Mutex<PoolState>>,
    gc: FrameGarbageCollector<SubAllocation>,
    chunk_size: u64,
    min_class_size: u64,
    max_chunk_count: usize,
}

impl TransientChunkPool {
    /// Creates an empty pool.
    ///
    /// # Panics
    ///
    /// If the sizes are not powers of two with `min_class_size <= chunk_size`, or
    /// `frames_in_flight` is outside `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        chunk_size: u64,
        min_class_size: u64,
        max_chunk_count: usize,
        frames_in_flight: usize,
    ) -> Self {
        if !chunk_size.is_power_of_two()
            || !min_class_size.is_power_of_two()
            || min_class_size > chunk_size
        {
            fatal!(
                "TransientChunkPool: invalid size classes {min_class_size}..={chunk_size}"
            );
        }
        if frames_in_flight == 0 || frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            fatal!("TransientChunkPool: {frames_in_flight} frames in flight is not supported");
        }

        let class_count = (chunk_size.trailing_zeros() - min_class_size.trailing_zeros()) as usize + 1;
        let state = Arc::new(Mutex::new(PoolState {
            chunks: Vec::new(),
            class_chunks: vec![Vec::new(); class_count],
            live_allocations: 0,
            live_bytes: 0,
        }));
        let gc = FrameGarbageCollector::new(
            "chunk pool",
            frames_in_flight,
            Box::new(ChunkReleaser {
                state: state.clone(),
            }),
        );

        Self {
            backend,
            state,
            gc,
            chunk_size,
            min_class_size,
            max_chunk_count,
        }
    }

    /// Creates a pool configured by `settings`.
    pub fn from_settings(backend: Arc<dyn GpuBackend>, settings: &GpuMemorySettings) -> Self {
        Self::new(
            backend,
            settings.chunk_size,
            settings.min_class_size,
            settings.max_chunk_count,
            settings.frames_in_flight,
        )
    }

    fn class_of(&self, size: u64) -> (usize, u64) {
        let class_size = size.next_power_of_two().max(self.min_class_size);
        let class = (class_size.trailing_zeros() - self.min_class_size.trailing_zeros()) as usize;
        (class, class_size)
    }

    /// Hands out a slot of at least `size` bytes.
    ///
    /// # Errors
    ///
    /// * [`ChunkPoolError::ChunkLimitReached`] if every chunk of the class is full and
    ///   the chunk ceiling is reached.
    /// * [`ChunkPoolError::TooLarge`] / [`ChunkPoolError::ZeroSized`] for invalid sizes.
    /// * [`ChunkPoolError::Backend`] if a new chunk cannot be created.
    pub fn allocate(&self, size: u64) -> Result<SubAllocation, ChunkPoolError> {
        if size == 0 {
            return Err(ChunkPoolError::ZeroSized);
        }
        if size > self.chunk_size {
            return Err(ChunkPoolError::TooLarge {
                requested: size,
                chunk_size: self.chunk_size,
            });
        }
        let (class, class_size) = self.class_of(size);

        let mut state = self.state.lock();
        let found = state.class_chunks[class].iter().copied().find(|&index| {
            state.chunks[index as usize]
                .as_ref()
                .is_some_and(|chunk| !chunk.free_slots.is_empty())
        });
        let index = match found {
            Some(index) => index,
            None => self.create_chunk(&mut state, class, class_size, size)?,
        };

        let Some(chunk) = state.chunks[index as usize].as_mut() else {
            fatal!("TransientChunkPool: chunk {index} vanished while allocating");
        };
        let Some(slot) = chunk.free_slots.pop() else {
            fatal!("TransientChunkPool: chunk {index} has no free slot");
        };
        let allocation = SubAllocation {
            chunk: ChunkId(index),
            buffer: chunk.buffer,
            offset: slot as u64 * class_size,
            size: class_size,
            class: class as u8,
        };
        state.live_allocations += 1;
        state.live_bytes += class_size;
        Ok(allocation)
    }

    fn create_chunk(
        &self,
        state: &mut PoolState,
        class: usize,
        class_size: u64,
        requested: u64,
    ) -> Result<u32, ChunkPoolError> {
        if state.chunk_count() >= self.max_chunk_count {
            return Err(ChunkPoolError::ChunkLimitReached {
                limit: self.max_chunk_count,
                requested,
            });
        }
        let buffer = self.backend.create_buffer(&BufferDescriptor {
            label: Some(Cow::Owned(format!("Chunk [{class_size} B slots]"))),
            size: self.chunk_size,
            usage: BufferUsage::STORAGE
                | BufferUsage::UNIFORM
                | BufferUsage::VERTEX
                | BufferUsage::INDEX
                | BufferUsage::COPY_DST,
        })?;

        let slot_count = (self.chunk_size / class_size) as u32;
        let chunk = Chunk {
            buffer,
            class,
            slot_size: class_size,
            // Reversed so slots are handed out from the start of the chunk.
            free_slots: (0..slot_count).rev().collect(),
            slot_count,
        };
        let index = match state.chunks.iter().position(Option::is_none) {
            Some(hole) => {
                state.chunks[hole] = Some(chunk);
                hole
            }
            None => {
                state.chunks.push(Some(chunk));
                state.chunks.len() - 1
            }
        } as u32;
        state.class_chunks[class].push(index);

        log::debug!(
            "TransientChunkPool: created chunk {index} for {class_size} byte slots ({slot_count} slots)"
        );
        Ok(index)
    }

    /// Frees `allocation` once the current frame retires.
    pub fn deferred_free(&self, allocation: SubAllocation) {
        self.gc.enqueue(GarbageCategory::Memory, allocation);
    }

    /// Associates a submission fence with the current frame of the pool.
    pub fn attach_fence(&self, fence: FenceHandle) {
        self.gc.attach_fence(fence);
    }

    /// Advances the pool's frame and returns retired slots to their chunks.
    pub fn begin_frame_and_collect(&self) -> usize {
        self.gc.begin_frame_and_collect()
    }

    /// Destroys chunks that have no live slot, through `native_gc`.
    ///
    /// # Returns
    ///
    /// The number of chunks released.
    pub fn trim_empty_chunks(&self, native_gc: &FrameGarbageCollector<NativeHandle>) -> usize {
        let released: Vec<BufferId> = {
            let mut state = self.state.lock();
            let PoolState {
                chunks,
                class_chunks,
                ..
            } = &mut *state;
            let mut released = Vec::new();
            for (index, entry) in chunks.iter_mut().enumerate() {
                if entry.as_ref().is_some_and(|chunk| chunk.live_slots() == 0) {
                    if let Some(chunk) = entry.take() {
                        class_chunks[chunk.class].retain(|&i| i as usize != index);
                        released.push(chunk.buffer);
                    }
                }
            }
            released
        };

        for buffer in &released {
            native_gc.enqueue_native(NativeHandle::Buffer(*buffer));
        }
        if !released.is_empty() {
            log::debug!("TransientChunkPool: trimmed {} empty chunks", released.len());
        }
        released.len()
    }

    /// Waits for the pool's fences and returns every pending slot.
    ///
    /// # Panics
    ///
    /// If a fence does not signal within `timeout`.
    pub fn finish(&self, timeout: Duration) -> usize {
        self.gc.finish(timeout)
    }

    /// Number of live chunks.
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunk_count()
    }

    /// Bytes reserved by live chunks.
    pub fn reserved_bytes(&self) -> u64 {
        self.chunk_count() as u64 * self.chunk_size
    }

    /// Number of slots handed out and not yet back in their chunk.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live_allocations
    }

    /// Bytes covered by [`live_allocations`](Self::live_allocations).
    pub fn live_bytes(&self) -> u64 {
        self.state.lock().live_bytes
    }

    /// Slots freed but waiting for their frame to retire.
    pub fn pending_frees(&self) -> usize {
        self.gc.pending_count()
    }

    /// Number of size classes.
    pub fn class_count(&self) -> usize {
        self.state.lock().class_chunks.len()
    }
}

impl Drop for TransientChunkPool {
    fn drop(&mut self) {
        let state = self.state.lock();
        if state.live_allocations > 0 {
            log::warn!(
                "TransientChunkPool: dropped with {} live sub-allocations",
                state.live_allocations
            );
        }
        for chunk in state.chunks.iter().flatten() {
            if let Err(e) = self.backend.destroy_native(NativeHandle::Buffer(chunk.buffer)) {
                log::warn!("TransientChunkPool: Failed to destroy chunk buffer: {e:?}");
            }
        }
    }
}
