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

use kestrel_core::{FenceHandle, RecyclerSettings};
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RECYCLER_ID: AtomicU64 = AtomicU64::new(1);

/// An object that can live in an [`ObjectRecycler`].
pub trait Recyclable: Send {
    /// Returns `true` once the GPU no longer uses the object.
    ///
    /// Only such objects are handed out again or destroyed by cache trimming.
    fn is_fence_signaled(&self) -> bool;

    /// Prepares a cached object for its next user.
    fn on_reuse(&mut self) {}
}

/// An object checked out of an [`ObjectRecycler`].
///
/// Only the recycler creates these, and giving one back through
/// [`ObjectRecycler::release`] or [`ObjectRecycler::retire`] is the only way to
/// end the checkout.
#[derive(Debug)]
#[must_use = "a recycled object must be released back to its recycler"]
pub struct Recycled<T> {
    object: T,
    owner: u64,
}

impl<T> Deref for Recycled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> DerefMut for Recycled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.object
    }
}

struct RecyclerState<T> {
    cache: Vec<T>,
    request_count: u32,
    miss_count: u32,
    desired_warm_count: usize,
    checked_out: usize,
}

/// A free-list pool whose entries become reusable when their fence signals.
///
/// Every `request_threshold` acquisitions the pool re-evaluates how many objects
/// it keeps warm: it grows after a window that missed, and shrinks by one after
/// a window that did not, so the cache follows the recent working set.
///
/// A miss only counts when the recycler already holds its whole warm set. Misses
/// while the cache is still refilling after a growth step do not grow it again.
/// With a window of at least twice the working set, the warm count stays within
/// one `grow_increment` of it.
pub struct ObjectRecycler<T: Recyclable> {
    id: u64,
    state: Mutex<RecyclerState<T>>,
    settings: RecyclerSettings,
    label: &'static str,
}

impl<T: Recyclable> std::fmt::Debug for ObjectRecycler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectRecycler")
            .field("label", &self.label)
            .field("cached", &state.cache.len())
            .field("checked_out", &state.checked_out)
            .field("desired_warm_count", &state.desired_warm_count)
            .finish()
    }
}

impl<T: Recyclable> ObjectRecycler<T> {
    /// Creates an empty recycler.
    pub fn new(label: &'static str, settings: RecyclerSettings) -> Self {
        Self {
            id: NEXT_RECYCLER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(RecyclerState {
                cache: Vec::new(),
                request_count: 0,
                miss_count: 0,
                desired_warm_count: 0,
                checked_out: 0,
            }),
            settings,
            label,
        }
    }

    /// Hands out a cached object whose fence signaled.
    ///
    /// `None` means the caller must construct a new object and register it with
    /// [`adopt`](Self::adopt).
    pub fn acquire(&self) -> Option<Recycled<T>> {
        let mut state = self.state.lock();
        state.request_count += 1;

        let index = state.cache.iter().position(|o| o.is_fence_signaled());
        let found = index.map(|i| state.cache.remove(i));
        let result = match found {
            Some(mut object) => {
                object.on_reuse();
                state.checked_out += 1;
                Some(Recycled {
                    object,
                    owner: self.id,
                })
            }
            None => {
                if state.checked_out + state.cache.len() >= state.desired_warm_count {
                    state.miss_count += 1;
                }
                None
            }
        };

        if state.request_count >= self.settings.request_threshold {
            self.adjust_warm_count(&mut state);
        }
        let keep = state.desired_warm_count.max(1);
        self.trim(&mut state, keep);
        result
    }

    /// Registers a newly constructed object as checked out.
    pub fn adopt(&self, object: T) -> Recycled<T> {
        self.state.lock().checked_out += 1;
        Recycled {
            object,
            owner: self.id,
        }
    }

    /// Returns an object to the cache.
    ///
    /// # Panics
    ///
    /// If the object was checked out of another recycler.
    pub fn release(&self, recycled: Recycled<T>) {
        let object = self.check_in(recycled);
        let mut state = self.state.lock();
        state.checked_out -= 1;
        state.cache.push(object);
        let keep = state.desired_warm_count;
        self.trim(&mut state, keep);
    }

    /// Ends a checkout without caching the object, giving it to the caller for good.
    pub fn retire(&self, recycled: Recycled<T>) -> T {
        let object = self.check_in(recycled);
        self.state.lock().checked_out -= 1;
        object
    }

    fn check_in(&self, recycled: Recycled<T>) -> T {
        if recycled.owner != self.id {
            fatal!(
                "ObjectRecycler({}): object released to a recycler it was not taken from",
                self.label
            );
        }
        recycled.object
    }

    fn adjust_warm_count(&self, state: &mut RecyclerState<T>) {
        let previous = state.desired_warm_count;
        if state.miss_count > 0 {
            state.desired_warm_count = (state.desired_warm_count
                + self.settings.grow_increment as usize)
                .min(self.settings.max_warm_count as usize);
        } else {
            state.desired_warm_count = state.desired_warm_count.saturating_sub(1);
        }
        if previous != state.desired_warm_count {
            log::trace!(
                "ObjectRecycler({}): warm count {previous} -> {} ({} misses in {} requests)",
                self.label,
                state.desired_warm_count,
                state.miss_count,
                state.request_count
            );
        }
        state.request_count = 0;
        state.miss_count = 0;
    }

    /// Destroys signaled entries, oldest first, until at most `keep` remain.
    fn trim(&self, state: &mut RecyclerState<T>, keep: usize) {
        let mut excess = state.cache.len().saturating_sub(keep);
        if excess == 0 {
            return;
        }
        state.cache.retain(|object| {
            if excess > 0 && object.is_fence_signaled() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    /// Number of objects waiting in the cache.
    pub fn cached_count(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Number of objects currently handed out.
    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    /// The number of objects the recycler currently aims to keep warm.
    pub fn desired_warm_count(&self) -> usize {
        self.state.lock().desired_warm_count
    }
}

impl<T: Recyclable> Drop for ObjectRecycler<T> {
    fn drop(&mut self) {
        let checked_out = self.state.get_mut().checked_out;
        if checked_out != 0 && !std::thread::panicking() {
            fatal!(
                "ObjectRecycler({}): destroyed with {checked_out} objects still checked out",
                self.label
            );
        }
    }
}

/// Pairs an object with the fence of the last submission that used it.
#[derive(Debug)]
pub struct FencedObject<T> {
    object: T,
    fence: Option<FenceHandle>,
}

impl<T> FencedObject<T> {
    /// Wraps an object that no submission uses yet.
    pub fn new(object: T) -> Self {
        Self {
            object,
            fence: None,
        }
    }

    /// Marks the object as used by the submission guarded by `fence`.
    pub fn set_fence(&mut self, fence: FenceHandle) {
        self.fence = Some(fence);
    }

    /// The fence of the last submission, if any.
    pub fn fence(&self) -> Option<&FenceHandle> {
        self.fence.as_ref()
    }
}

impl<T> Deref for FencedObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T> DerefMut for FencedObject<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.object
    }
}

impl<T: Send> Recyclable for FencedObject<T> {
    fn is_fence_signaled(&self) -> bool {
        match &self.fence {
            Some(fence) => fence.is_signaled(),
            None => true,
        }
    }

    fn on_reuse(&mut self) {
        self.fence = None;
    }
}
