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

//! # Kestrel Memory
//!
//! Frame-pipelined management of GPU memory and synchronization objects.
//!
//! The CPU records frame `F` while the GPU still executes frames `F-1 .. F-N+1`.
//! Everything in this crate exists to keep the CPU from reusing or destroying a
//! resource the GPU may still touch:
//!
//! - [`RingAllocator`]: lock-free per-frame memory for data written once and read once,
//!   handed out through a [`TransientFrame`].
//! - [`GpuVisibleRing`]: the same frame cycle for device-local data the CPU never sees.
//! - [`TransientChunkPool`]: longer-lived sub-allocations of large chunks.
//! - [`FrameGarbageCollector`]: destruction deferred until a frame's fences signal.
//! - [`ObjectRecycler`]: warm caches for fences, semaphores, swap chains and other driver objects.
//! - [`GpuMemoryContext`]: the owner of all of the above for one device.

#![warn(missing_docs)]

/// Logs an error, then panics with the same message.
///
/// Used for programmer and configuration errors that leave no sane way forward.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        log::error!($($arg)+);
        panic!($($arg)+)
    }};
}

mod chunk;
mod context;
mod error;
mod gc;
mod recycle;
mod transient;

pub use chunk::{ChunkId, SubAllocation, TransientChunkPool};
pub use context::{FrameScope, GpuMemoryContext};
pub use error::{ChunkPoolError, ContextError, TransientMemoryError};
pub use gc::{Disposer, FrameGarbageCollector, NativeDisposer};
pub use recycle::{
    FenceFactory, FencedObject, ObjectRecycler, OwnedSemaphore, OwnedSwapchain, Recyclable,
    Recycled, RecycledSemaphore, RecycledSwapchain, SemaphoreFactory, SwapchainFactory,
};
pub use transient::{
    GpuTransientAllocation, GpuVisibleRing, RingAllocator, StructuredView, TransientAllocation,
    TransientFrame,
};
