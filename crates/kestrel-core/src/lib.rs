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

//! # Kestrel Core
//!
//! Foundational crate containing the contracts and plain data types shared by the
//! frame-pipelined GPU memory subsystem.
//!
//! Nothing in here allocates GPU memory or keeps per-frame state. The allocators,
//! recyclers and garbage collectors live in `kestrel-memory`; the concrete backends
//! that satisfy [`gpu::GpuBackend`] live in `kestrel-infra`.

#![warn(missing_docs)]

pub mod config;
pub mod gpu;
pub mod memory;
pub mod sync;
pub mod telemetry;
pub mod utils;

pub use config::{ConfigError, GpuMemorySettings, RecyclerSettings, MAX_FRAMES_IN_FLIGHT};
pub use gpu::{GpuBackend, ResourceError};
pub use sync::{FenceHandle, NativeFence};
