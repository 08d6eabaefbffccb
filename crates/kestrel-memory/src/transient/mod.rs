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

//! Per-frame transient memory.
//!
//! Uniforms, dynamic vertices and other data written by the CPU once per frame
//! and read by the GPU once are carved out of a single persistently mapped ring.
//! There is no free: a range becomes reusable once the frames in flight that
//! could still read it have retired. Data only the GPU touches goes to a second,
//! unmapped ring with the same frame cycle.

mod allocation;
mod cursor;
mod gpu_ring;
mod ring;

pub use self::allocation::{StructuredView, TransientAllocation};
pub use self::gpu_ring::{GpuTransientAllocation, GpuVisibleRing};
pub use self::ring::{RingAllocator, TransientFrame};
