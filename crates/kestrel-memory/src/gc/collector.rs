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

use kestrel_core::gpu::GarbageCategory;
use kestrel_core::{FenceHandle, MAX_FRAMES_IN_FLIGHT};
use parking_lot::Mutex;
use std::time::Duration;

/// Destroys items once the GPU is done with them.
pub trait Disposer<T>: Send + Sync {
    /// Destroys `item`. Called outside of the collector lock.
    fn dispose(&self, category: GarbageCategory, item: T);
}

struct FrameSlot<T> {
    items: [Vec<T>; GarbageCategory::COUNT],
    fences: Vec<FenceHandle>,
}

impl<T> FrameSlot<T> {
    fn new() -> Self {
        Self {
            items: std::array::from_fn(|_| Vec::new()),
            fences: Vec::new(),
        }
    }

    fn pending(&self) -> usize {
        self.items.iter().map(Vec::len).sum()
    }

    /// Moves every item out, in destruction order.
    fn drain(&mut self) -> Vec<(GarbageCategory, Vec<T>)> {
        GarbageCategory::ALL
            .iter()
            .zip(self.items.iter_mut())
            .filter(|(_, items)| !items.is_empty())
            .map(|(&category, items)| (category, std::mem::take(items)))
            .collect()
    }
}

struct CollectorState<T> {
    slots: Vec<FrameSlot<T>>,
    current: usize,
    frame: u64,
}

/// An N-slot deferred-destruction queue.
///
/// `enqueue`, `attach_fence` and `begin_frame_and_collect` may be called from
/// any thread; the frame-boundary call itself must be externally serialized.
pub struct FrameGarbageCollector<T> {
    state: Mutex<CollectorState<T>>,
    disposer: Box<dyn Disposer<T>>,
    label: &'static str,
}

impl<T> std::fmt::Debug for FrameGarbageCollector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameGarbageCollector")
            .field("label", &self.label)
            .field("slots", &state.slots.len())
            .field("current", &state.current)
            .finish()
    }
}

impl<T: Send> FrameGarbageCollector<T> {
    /// Creates a collector with one slot per frame in flight.
    ///
    /// # Panics
    ///
    /// If `frames_in_flight` is outside `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(
        label: &'static str,
        frames_in_flight: usize,
        disposer: Box<dyn Disposer<T>>,
    ) -> Self {
        if frames_in_flight == 0 || frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            fatal!("FrameGarbageCollector({label}): {frames_in_flight} frames in flight is not supported");
        }
        Self {
            state: Mutex::new(CollectorState {
                slots: (0..frames_in_flight).map(|_| FrameSlot::new()).collect(),
                current: 0,
                frame: 0,
            }),
            disposer,
            label,
        }
    }

    /// Queues `item` for destruction once the current frame retires.
    pub fn enqueue(&self, category: GarbageCategory, item: T) {
        let mut state = self.state.lock();
        let current = state.current;
        state.slots[current].items[category.index()].push(item);
    }

    /// Associates a submission fence with the current frame.
    ///
    /// A frame submitted to several queues gets one fence per queue; its garbage
    /// is released only once all of them have signaled.
    pub fn attach_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        let current = state.current;
        state.slots[current].fences.push(fence);
    }

    /// Advances to the next slot and disposes of its items if their frame retired.
    ///
    /// # Returns
    ///
    /// The number of items disposed.
    pub fn begin_frame_and_collect(&self) -> usize {
        let batches = {
            let mut state = self.state.lock();
            state.current = (state.current + 1) % state.slots.len();
            state.frame += 1;
            let frame = state.frame;
            let current = state.current;
            let slot = &mut state.slots[current];

            if slot.pending() == 0 {
                slot.fences.clear();
                return 0;
            }

            let retired = !slot.fences.is_empty() && slot.fences.iter().all(FenceHandle::is_signaled);
            if !retired {
                log::warn!(
                    "FrameGarbageCollector({}): slot {current} reused before retirement at frame {frame} ({} items kept, {} fences attached)",
                    self.label,
                    slot.pending(),
                    slot.fences.len()
                );
                return 0;
            }

            slot.fences.clear();
            slot.drain()
        };

        let disposed = self.dispose_batches(batches);
        log::debug!("FrameGarbageCollector({}): disposed {disposed} items", self.label);
        disposed
    }

    /// Waits for every attached fence and disposes of everything still queued.
    ///
    /// This is the shutdown path; once it returns the collector is empty.
    ///
    /// # Panics
    ///
    /// If a fence does not signal within `timeout`: the GPU is hung.
    pub fn finish(&self, timeout: Duration) -> usize {
        let (fences, batches) = {
            let mut state = self.state.lock();
            let n = state.slots.len();
            let start = (state.current + 1) % n;
            let mut fences = Vec::new();
            let mut batches = Vec::new();
            // Oldest slot first.
            for i in 0..n {
                let slot = &mut state.slots[(start + i) % n];
                fences.append(&mut slot.fences);
                batches.extend(slot.drain());
            }
            (fences, batches)
        };

        for fence in &fences {
            if !fence.wait_up_to(timeout) {
                fatal!(
                    "FrameGarbageCollector({}): Timeout detected while waiting for a fence ({timeout:?})",
                    self.label
                );
            }
        }

        let disposed = self.dispose_batches(batches);
        log::debug!(
            "FrameGarbageCollector({}): finished, disposed {disposed} items",
            self.label
        );
        disposed
    }

    fn dispose_batches(&self, batches: Vec<(GarbageCategory, Vec<T>)>) -> usize {
        let mut disposed = 0;
        for (category, items) in batches {
            disposed += items.len();
            for item in items {
                self.disposer.dispose(category, item);
            }
        }
        disposed
    }

    /// Number of items waiting in all slots.
    pub fn pending_count(&self) -> usize {
        self.state.lock().slots.iter().map(FrameSlot::pending).sum()
    }

    /// Number of fences attached to the current slot.
    pub fn current_fence_count(&self) -> usize {
        let state = self.state.lock();
        state.slots[state.current].fences.len()
    }

    /// Number of slots.
    pub fn frames_in_flight(&self) -> usize {
        self.state.lock().slots.len()
    }
}

impl<T> Drop for FrameGarbageCollector<T> {
    fn drop(&mut self) {
        let pending: usize = self.state.get_mut().slots.iter().map(FrameSlot::pending).sum();
        if pending > 0 {
            log::warn!(
                "FrameGarbageCollector({}): dropped with {pending} items never destroyed",
                self.label
            );
        }
    }
}
