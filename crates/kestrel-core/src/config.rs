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

//! Tunables of the GPU memory subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on the number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// An error raised when [`GpuMemorySettings`] cannot be loaded or is inconsistent.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The settings document could not be parsed.
    Parse(String),
    /// A field holds a value the subsystem cannot work with.
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Failed to parse GPU memory settings: {msg}"),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Tuning of an adaptive object recycler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclerSettings {
    /// Number of `acquire` calls between two re-evaluations of the warm count.
    pub request_threshold: u32,
    /// How much the warm count grows after a window that saw a cache miss.
    pub grow_increment: u32,
    /// Ceiling of the warm count.
    pub max_warm_count: u32,
}

impl Default for RecyclerSettings {
    fn default() -> Self {
        Self {
            request_threshold: 64,
            grow_increment: 4,
            max_warm_count: 256,
        }
    }
}

/// Settings of a `GpuMemoryContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuMemorySettings {
    /// Size in bytes of the persistently mapped transient ring buffer.
    pub transient_buffer_size: u64,
    /// Size in bytes of the device-local ring for data only the GPU writes.
    pub gpu_transient_buffer_size: u64,
    /// Number of frames the CPU records ahead of the GPU.
    pub frames_in_flight: usize,
    /// Fraction of a frame's fair share of the ring above which a warning is logged.
    pub overcommit_warning_ratio: f64,
    /// Size in bytes of every chunk created by the chunk pool.
    pub chunk_size: u64,
    /// Smallest size class of the chunk pool.
    pub min_class_size: u64,
    /// Maximum number of chunks alive at once.
    pub max_chunk_count: usize,
    /// Tuning of the fence and semaphore recyclers.
    pub recycler: RecyclerSettings,
    /// How long shutdown waits for each outstanding fence before declaring a hang.
    pub shutdown_fence_timeout_ms: u64,
}

impl Default for GpuMemorySettings {
    fn default() -> Self {
        Self {
            transient_buffer_size: 16 * 1024 * 1024,
            gpu_transient_buffer_size: 32 * 1024 * 1024,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            overcommit_warning_ratio: 0.8,
            chunk_size: 4 * 1024 * 1024,
            min_class_size: 256,
            max_chunk_count: 64,
            recycler: RecyclerSettings::default(),
            shutdown_fence_timeout_ms: 10_000,
        }
    }
}

impl GpuMemorySettings {
    /// Loads settings from a JSON document. Missing fields take their default value.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Err(e) = settings.validate() {
            log::warn!("GpuMemorySettings: rejected settings document: {e}");
            return Err(e);
        }
        log::debug!("GpuMemorySettings: loaded {settings:?}");
        Ok(settings)
    }

    /// Checks that the settings describe a usable configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.into(),
            })
        }

        if self.transient_buffer_size == 0 {
            return invalid("transient_buffer_size", "must be non-zero");
        }
        if self.gpu_transient_buffer_size == 0 {
            return invalid("gpu_transient_buffer_size", "must be non-zero");
        }
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return invalid(
                "frames_in_flight",
                format!("must be between 1 and {MAX_FRAMES_IN_FLIGHT}"),
            );
        }
        if !(self.overcommit_warning_ratio > 0.0 && self.overcommit_warning_ratio <= 1.0) {
            return invalid("overcommit_warning_ratio", "must be in (0, 1]");
        }
        if !self.chunk_size.is_power_of_two() {
            return invalid("chunk_size", "must be a power of two");
        }
        if !self.min_class_size.is_power_of_two() || self.min_class_size > self.chunk_size {
            return invalid(
                "min_class_size",
                "must be a power of two no larger than chunk_size",
            );
        }
        if self.max_chunk_count == 0 {
            return invalid("max_chunk_count", "must be non-zero");
        }
        if self.recycler.request_threshold == 0 {
            return invalid("recycler.request_threshold", "must be non-zero");
        }
        if self.recycler.grow_increment == 0 {
            return invalid("recycler.grow_increment", "must be non-zero");
        }
        Ok(())
    }

    /// The shutdown fence timeout as a `Duration`.
    pub fn shutdown_fence_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_fence_timeout_ms)
    }
}
