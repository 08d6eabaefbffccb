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
use kestrel_core::gpu::{GpuBackend, NativeHandle, SwapchainDescriptor, SwapchainId};
use kestrel_core::{FenceHandle, RecyclerSettings, ResourceError};
use parking_lot::Mutex;
use std::sync::Arc;

/// A driver swap chain destroyed when dropped.
#[derive(Debug)]
pub struct OwnedSwapchain {
    id: SwapchainId,
    descriptor: SwapchainDescriptor,
    backend: Arc<dyn GpuBackend>,
}

impl OwnedSwapchain {
    /// The driver handle.
    pub fn id(&self) -> SwapchainId {
        self.id
    }

    /// The surface configuration this swap chain was created with.
    pub fn descriptor(&self) -> &SwapchainDescriptor {
        &self.descriptor
    }
}

impl Drop for OwnedSwapchain {
    fn drop(&mut self) {
        if let Err(e) = self.backend.destroy_native(NativeHandle::Swapchain(self.id)) {
            log::warn!("OwnedSwapchain: Failed to destroy swap chain {:?}: {e:?}", self.id);
        }
    }
}

/// A swap chain checked out of a [`SwapchainFactory`].
pub type RecycledSwapchain = Recycled<FencedObject<OwnedSwapchain>>;

/// Mints swap chains for one surface, reusing those whose last present completed.
///
/// After [`reconfigure`](Self::reconfigure), cached swap chains built for the old
/// surface size are destroyed as soon as the GPU is done with them and are never
/// handed out again.
#[derive(Debug)]
pub struct SwapchainFactory {
    backend: Arc<dyn GpuBackend>,
    descriptor: Mutex<SwapchainDescriptor>,
    recycler: ObjectRecycler<FencedObject<OwnedSwapchain>>,
}

impl SwapchainFactory {
    /// Creates a factory presenting with `descriptor`.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: SwapchainDescriptor,
        settings: RecyclerSettings,
    ) -> Self {
        Self {
            backend,
            descriptor: Mutex::new(descriptor),
            recycler: ObjectRecycler::new("swap chains", settings),
        }
    }

    /// The configuration new swap chains are created with.
    pub fn descriptor(&self) -> SwapchainDescriptor {
        *self.descriptor.lock()
    }

    /// Switches to a new surface configuration, typically after a resize.
    pub fn reconfigure(&self, descriptor: SwapchainDescriptor) {
        let mut current = self.descriptor.lock();
        if *current != descriptor {
            log::debug!("SwapchainFactory: Reconfigured from {:?} to {descriptor:?}", *current);
            *current = descriptor;
        }
    }

    /// Returns a swap chain matching the current configuration that no present is using.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if a new swap chain is needed and cannot be created.
    pub fn new_swapchain(&self) -> Result<RecycledSwapchain, ResourceError> {
        let descriptor = self.descriptor();
        while let Some(swapchain) = self.recycler.acquire() {
            if *swapchain.descriptor() == descriptor {
                return Ok(swapchain);
            }
            let stale = self.recycler.retire(swapchain);
            log::trace!("SwapchainFactory: Dropping stale swap chain {:?}", stale.id());
        }
        let id = self.backend.create_swapchain(&descriptor)?;
        Ok(self.recycler.adopt(FencedObject::new(OwnedSwapchain {
            id,
            descriptor,
            backend: self.backend.clone(),
        })))
    }

    /// Gives a swap chain back once its last present was submitted under `fence`.
    pub fn release_swapchain(&self, mut swapchain: RecycledSwapchain, fence: FenceHandle) {
        swapchain.set_fence(fence);
        self.recycler.release(swapchain);
    }

    /// Number of swap chains waiting for reuse.
    pub fn cached_count(&self) -> usize {
        self.recycler.cached_count()
    }

    /// Number of swap chains handed out.
    pub fn live_count(&self) -> usize {
        self.recycler.checked_out()
    }
}
