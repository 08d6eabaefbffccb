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

//! Deferred destruction.
//!
//! The GPU runs up to N frames behind the CPU, so an object dropped by the CPU
//! may still be read by commands already submitted. Instead of destroying it,
//! callers queue it in the slot of the current frame; the slot is emptied when
//! the collector comes back to it and the frame's fences have signaled.
//!
//! ```text
//!   frame F      enqueue(x) -> slot F % N, attach_fence(f)
//!   frame F + N  begin_frame_and_collect() enters slot F % N
//!                  f signaled     -> x is disposed
//!                  f not signaled -> warning, x stays queued
//! ```

mod collector;
mod native;

pub use self::collector::{Disposer, FrameGarbageCollector};
pub use self::native::NativeDisposer;
