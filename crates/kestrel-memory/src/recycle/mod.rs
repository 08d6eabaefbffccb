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

//! Reuse of expensive driver objects.
//!
//! Fences, semaphores, swap chains and similar objects are cheap to reuse and
//! costly to create. An [`ObjectRecycler`] keeps released objects warm until the
//! GPU is done with them and sizes its cache after the observed demand.

mod fence_factory;
mod recycler;
mod semaphore_factory;
mod swapchain_factory;

pub use self::fence_factory::FenceFactory;
pub use self::recycler::{FencedObject, ObjectRecycler, Recyclable, Recycled};
pub use self::semaphore_factory::{OwnedSemaphore, RecycledSemaphore, SemaphoreFactory};
pub use self::swapchain_factory::{OwnedSwapchain, RecycledSwapchain, SwapchainFactory};
