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

use super::{FencedObject, ObjectRecycler, Recycled};
use kestrel_core::gpu::{GpuBackend, NativeHandle, SemaphoreId, SemaphoreKind};
use kestrel_core::{FenceHandle, RecyclerSettings, ResourceError};
use std::sync::Arc;

/// A driver semaphore destroyed when dropped.
///
/// Timeline semaphores remember the last value handed out, so a recycled one
/// keeps counting up from where its previous user stopped.
#[derive(Debug)]
pub struct OwnedSemaphore {
    id: SemaphoreId,
    kind: SemaphoreKind,
    signal_value: u64,
    backend: Arc<dyn GpuBackend>,
}

impl OwnedSemaphore {
    /// The driver handle.
    pub fn id(&self) -> SemaphoreId {
        self.id
    }

    /// Whether this is a binary or a timeline semaphore.
    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }

    /// The last value handed out by [`Self::next_signal_value`].
    pub fn signal_value(&self) -> u64 {
        self.signal_value
    }

    /// Reserves the value the next submission signals.
    ///
    /// # Panics
    ///
    /// Panics on a binary semaphore.
    pub fn next_signal_value(&mut self) -> u64 {
        if self.kind != SemaphoreKind::Timeline {
            fatal!("OwnedSemaphore: {:?} is a binary semaphore and has no values", self.id);
        }
        self.signal_value += 1;
        self.signal_value
    }
}

impl Drop for OwnedSemaphore {
    fn drop(&mut self) {
        if let Err(e) = self.backend.destroy_native(NativeHandle::Semaphore(self.id)) {
            log::warn!("OwnedSemaphore: Failed to destroy semaphore {:?}: {e:?}", self.id);
        }
    }
}

/// A semaphore checked out of a [`SemaphoreFactory`].
pub type RecycledSemaphore = Recycled<FencedObject<OwnedSemaphore>>;

/// Mints semaphores, reusing those whose last submission completed.
///
/// Binary and timeline semaphores are cached apart so a request never gets the
/// wrong kind back.
#[derive(Debug)]
pub struct SemaphoreFactory {
    backend: Arc<dyn GpuBackend>,
    binary: ObjectRecycler<FencedObject<OwnedSemaphore>>,
    timeline: ObjectRecycler<FencedObject<OwnedSemaphore>>,
}

impl SemaphoreFactory {
    /// Creates a factory for semaphores of `backend`.
    pub fn new(backend: Arc<dyn GpuBackend>, settings: RecyclerSettings) -> Self {
        Self {
            backend,
            binary: ObjectRecycler::new("binary semaphores", settings),
            timeline: ObjectRecycler::new("timeline semaphores", settings),
        }
    }

    fn recycler(&self, kind: SemaphoreKind) -> &ObjectRecycler<FencedObject<OwnedSemaphore>> {
        match kind {
            SemaphoreKind::Binary => &self.binary,
            SemaphoreKind::Timeline => &self.timeline,
        }
    }

    /// Returns a semaphore of `kind` no submission is using.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if a new semaphore is needed and cannot be created.
    pub fn new_semaphore(&self, kind: SemaphoreKind) -> Result<RecycledSemaphore, ResourceError> {
        let recycler = self.recycler(kind);
        if let Some(semaphore) = recycler.acquire() {
            return Ok(semaphore);
        }
        let id = self.backend.create_semaphore(kind)?;
        Ok(recycler.adopt(FencedObject::new(OwnedSemaphore {
            id,
            kind,
            signal_value: 0,
            backend: self.backend.clone(),
        })))
    }

    /// Gives a semaphore back once it has been handed to the submission guarded by `fence`.
    pub fn release_semaphore(&self, mut semaphore: RecycledSemaphore, fence: FenceHandle) {
        semaphore.set_fence(fence);
        self.recycler(semaphore.kind()).release(semaphore);
    }

    /// Number of semaphores waiting for reuse.
    pub fn cached_count(&self) -> usize {
        self.binary.cached_count() + self.timeline.cached_count()
    }

    /// Number of semaphores handed out.
    pub fn live_count(&self) -> usize {
        self.binary.checked_out() + self.timeline.checked_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_infra::HeadlessBackend;

    #[test]
    fn semaphore_is_reused_after_its_submission() {
        let backend = Arc::new(HeadlessBackend::new());
        let factory = SemaphoreFactory::new(backend.clone(), RecyclerSettings::default());

        let first = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        let id = first.id();
        let fence = FenceHandle::new(backend.create_fence().unwrap());
        factory.release_semaphore(first, fence.clone());

        let busy = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        assert_ne!(busy.id(), id);

        backend.retire_all();
        let reused = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        assert_eq!(reused.id(), id);
        assert!(reused.fence().is_none());

        factory.release_semaphore(busy, fence.clone());
        factory.release_semaphore(reused, fence);
        assert_eq!(factory.live_count(), 0);
    }

    #[test]
    fn kinds_are_never_mixed_up() {
        let backend = Arc::new(HeadlessBackend::new());
        let factory = SemaphoreFactory::new(backend.clone(), RecyclerSettings::default());

        let binary = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        let binary_id = binary.id();
        factory.release_semaphore(binary, FenceHandle::new(backend.create_fence().unwrap()));
        backend.retire_all();

        let timeline = factory.new_semaphore(SemaphoreKind::Timeline).unwrap();
        assert_ne!(timeline.id(), binary_id);
        assert_eq!(timeline.kind(), SemaphoreKind::Timeline);
        assert_eq!(backend.semaphore_kind(timeline.id()), Some(SemaphoreKind::Timeline));
        assert_eq!(factory.cached_count(), 1);

        let binary = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        assert_eq!(binary.id(), binary_id);

        let fence = FenceHandle::new(backend.create_fence().unwrap());
        factory.release_semaphore(timeline, fence.clone());
        factory.release_semaphore(binary, fence);
    }

    #[test]
    fn timeline_values_keep_counting_across_reuse() {
        let backend = Arc::new(HeadlessBackend::new());
        let factory = SemaphoreFactory::new(backend.clone(), RecyclerSettings::default());

        let mut timeline = factory.new_semaphore(SemaphoreKind::Timeline).unwrap();
        assert_eq!(timeline.signal_value(), 0);
        assert_eq!(timeline.next_signal_value(), 1);
        assert_eq!(timeline.next_signal_value(), 2);
        factory.release_semaphore(timeline, FenceHandle::new(backend.create_fence().unwrap()));
        backend.retire_all();

        let mut reused = factory.new_semaphore(SemaphoreKind::Timeline).unwrap();
        assert_eq!(reused.signal_value(), 2);
        assert_eq!(reused.next_signal_value(), 3);
        factory.release_semaphore(reused, FenceHandle::new(backend.create_fence().unwrap()));
    }

    #[test]
    #[should_panic(expected = "binary semaphore")]
    fn binary_semaphores_have_no_values() {
        let backend = Arc::new(HeadlessBackend::new());
        let factory = SemaphoreFactory::new(backend, RecyclerSettings::default());
        let mut binary = factory.new_semaphore(SemaphoreKind::Binary).unwrap();
        binary.next_signal_value();
    }

    #[test]
    fn dropping_the_factory_destroys_cached_semaphores() {
        let backend = Arc::new(HeadlessBackend::new());
        let factory = SemaphoreFactory::new(backend.clone(), RecyclerSettings::default());
        let semaphore = factory.new_semaphore(SemaphoreKind::Timeline).unwrap();
        let fence = FenceHandle::new(backend.create_fence().unwrap());
        factory.release_semaphore(semaphore, fence);
        assert_eq!(backend.live_semaphore_count(), 1);

        drop(factory);
        assert_eq!(backend.live_semaphore_count(), 0);
    }
}
