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

//! Provides traits and data structures for active resource monitoring.
//!
//! A monitor polls a resource to get a snapshot of its state. Monitors are held
//! by whatever collects telemetry, which calls `update` and `get_usage_report`
//! on a schedule of its choosing.

use std::borrow::Cow;
use std::fmt::Debug;

use crate::memory::GpuMemoryStats;

/// The core trait for a resource monitor.
pub trait ResourceMonitor: Send + Sync + Debug + 'static {
    /// Returns a unique, human-readable identifier for this monitor instance.
    fn monitor_id(&self) -> Cow<'static, str>;

    /// Returns the general type of resource being monitored.
    fn resource_type(&self) -> MonitoredResourceType;

    /// Returns a snapshot of the current usage data for the monitored resource.
    fn get_usage_report(&self) -> ResourceUsageReport;

    /// Allows downcasting to a concrete `ResourceMonitor` type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Triggers the monitor to update its internal state by polling the resource.
    /// This default implementation does nothing, for monitors that update passively.
    fn update(&self) {}
}

/// An enumeration of the types of resources that can be monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredResourceType {
    /// GPU memory managed by the frame-pipelined allocators.
    GpuMemory,
}

/// A generic, unified report of resource usage, typically in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsageReport {
    /// The number of bytes currently in use.
    pub current_bytes: u64,
    /// The peak number of bytes ever in use simultaneously, if tracked.
    pub peak_bytes: Option<u64>,
    /// The total capacity of the resource in bytes, if known.
    pub total_capacity_bytes: Option<u64>,
}

/// A trait for types that can provide GPU memory statistics.
/// Implemented by `GpuMemoryContext`; read by monitors in `kestrel-infra`.
pub trait GpuMemoryStatsProvider: Send + Sync {
    /// Takes a snapshot of the current statistics.
    fn memory_stats(&self) -> GpuMemoryStats;
}
