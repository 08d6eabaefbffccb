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

use super::{ObjectRecycler, Recyclable, Recycled};
use kestrel_core::gpu::GpuBackend;
use kestrel_core::{FenceHandle, NativeFence, RecyclerSettings, ResourceError};
use std::sync::Arc;
use std::time::Duration;

/// A driver fence parked in the fence recycler.
#[derive(Debug)]
struct PooledFence {
    native: Box<dyn NativeFence>,
}

impl Recyclable for PooledFence {
    fn is_fence_signaled(&self) -> bool {
        self.native.poll()
    }

    fn on_reuse(&mut self) {
        self.native.reset();
    }
}

/// The native side of a [`FenceHandle`] minted by a [`FenceFactory`].
///
/// When the last handle clone drops, the driver fence goes back to the recycler
/// instead of being destroyed.
#[derive(Debug)]
struct RecycledFence {
    fence: Option<Recycled<PooledFence>>,
    recycler: Arc<ObjectRecycler<PooledFence>>,
}

impl NativeFence for RecycledFence {
    fn poll(&self) -> bool {
        self.fence.as_ref().is_some_and(|f| f.native.poll())
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.fence.as_ref().is_some_and(|f| f.native.wait(timeout))
    }

    fn reset(&mut self) {
        if let Some(fence) = self.fence.as_mut() {
            fence.native.reset();
        }
    }
}

impl Drop for RecycledFence {
    fn drop(&mut self) {
        if let Some(fence) = self.fence.take() {
            self.recycler.release(fence);
        }
    }
}

/// Mints [`FenceHandle`]s, reusing driver fences whose submission completed.
#[derive(Debug)]
pub struct FenceFactory {
    backend: Arc<dyn GpuBackend>,
    recycler: Arc<ObjectRecycler<PooledFence>>,
}

impl FenceFactory {
    /// Creates a factory for fences of `backend`.
    pub fn new(backend: Arc<dyn GpuBackend>, settings: RecyclerSettings) -> Self {
        Self {
            backend,
            recycler: Arc::new(ObjectRecycler::new("fences", settings)),
        }
    }

    /// Returns an unsignaled fence, recycled when possible.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if a new driver fence is needed and cannot be created.
    pub fn new_fence(&self) -> Result<FenceHandle, ResourceError> {
        let fence = match self.recycler.acquire() {
            Some(fence) => fence,
            None => self.recycler.adopt(PooledFence {
                native: self.backend.create_fence()?,
            }),
        };
        Ok(FenceHandle::new(Box::new(RecycledFence {
            fence: Some(fence),
            recycler: self.recycler.clone(),
        })))
    }

    /// Number of driver fences waiting for reuse.
    pub fn cached_count(&self) -> usize {
        self.recycler.cached_count()
    }

    /// Number of driver fences behind live handles.
    pub fn live_count(&self) -> usize {
        self.recycler.checked_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_infra::HeadlessBackend;

    fn factory() -> (Arc<HeadlessBackend>, FenceFactory) {
        let backend = Arc::new(HeadlessBackend::new());
        let settings = RecyclerSettings {
            request_threshold: 4,
            grow_increment: 2,
            max_warm_count: 8,
        };
        (backend.clone(), FenceFactory::new(backend, settings))
    }

    #[test]
    fn dropped_handle_returns_its_fence_for_reuse() {
        let (backend, factory) = factory();
        let fence = factory.new_fence().unwrap();
        let clone = fence.clone();
        assert_eq!(factory.live_count(), 1);

        drop(fence);
        assert_eq!(factory.live_count(), 1);
        drop(clone);
        assert_eq!(factory.live_count(), 0);
        assert_eq!(factory.cached_count(), 1);

        backend.retire_all();
        let reused = factory.new_fence().unwrap();
        assert!(!reused.is_signaled(), "a reused fence must be reset");
        assert_eq!(backend.fences_created(), 1);
    }

    #[test]
    fn fence_still_in_flight_is_not_reused() {
        let (backend, factory) = factory();
        drop(factory.new_fence().unwrap());
        let second = factory.new_fence().unwrap();
        assert_eq!(backend.fences_created(), 2);

        backend.retire_all();
        assert!(second.is_signaled());
    }
}
