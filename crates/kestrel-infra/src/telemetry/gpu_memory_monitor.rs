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

//! GPU Memory Resource Monitor
//!
//! Exposes the statistics of a memory context through the `ResourceMonitor`
//! interface without keeping the context alive.

use kestrel_core::memory::GpuMemoryStats;
use kestrel_core::telemetry::monitoring::{
    GpuMemoryStatsProvider, MonitoredResourceType, ResourceMonitor, ResourceUsageReport,
};
use std::borrow::Cow;
use std::sync::{Mutex, Weak};

/// Monitor over a [`GpuMemoryStatsProvider`], typically a `GpuMemoryContext`.
#[derive(Debug)]
pub struct GpuMemoryMonitor {
    /// Weak reference to the provider to avoid circular dependencies
    provider: Weak<dyn GpuMemoryStatsProvider>,
    id: String,
    last_stats: Mutex<Option<GpuMemoryStats>>,
    peak_in_use_bytes: Mutex<u64>,
}

impl GpuMemoryMonitor {
    /// Creates a monitor for `provider`.
    pub fn new(provider: Weak<dyn GpuMemoryStatsProvider>, id: String) -> Self {
        Self {
            provider,
            id,
            last_stats: Mutex::new(None),
            peak_in_use_bytes: Mutex::new(0),
        }
    }

    /// Returns the statistics captured by the last `update`.
    pub fn last_stats(&self) -> Option<GpuMemoryStats> {
        *self.last_stats.lock().unwrap()
    }

    fn in_use_bytes(stats: &GpuMemoryStats) -> u64 {
        stats.ring_bytes_last_frame
            + stats.gpu_ring_bytes_last_frame
            + stats.live_sub_allocation_bytes
    }
}

impl ResourceMonitor for GpuMemoryMonitor {
    fn monitor_id(&self) -> Cow<'static, str> {
        Cow::Owned(self.id.clone())
    }

    fn resource_type(&self) -> MonitoredResourceType {
        MonitoredResourceType::GpuMemory
    }

    fn get_usage_report(&self) -> ResourceUsageReport {
        let Some(stats) = self.last_stats() else {
            return ResourceUsageReport::default();
        };
        ResourceUsageReport {
            current_bytes: Self::in_use_bytes(&stats),
            peak_bytes: Some(*self.peak_in_use_bytes.lock().unwrap()),
            total_capacity_bytes: Some(stats.reserved_bytes()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn update(&self) {
        let Some(provider) = self.provider.upgrade() else {
            // The context is gone; keep the last snapshot.
            return;
        };
        let stats = provider.memory_stats();

        let mut peak = self.peak_in_use_bytes.lock().unwrap();
        *peak = (*peak).max(Self::in_use_bytes(&stats));
        *self.last_stats.lock().unwrap() = Some(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct FixedProvider {
        stats: Mutex<GpuMemoryStats>,
    }

    impl GpuMemoryStatsProvider for FixedProvider {
        fn memory_stats(&self) -> GpuMemoryStats {
            *self.stats.lock().unwrap()
        }
    }

    fn monitor_for(provider: &Arc<FixedProvider>) -> GpuMemoryMonitor {
        let provider: Arc<dyn GpuMemoryStatsProvider> = provider.clone();
        GpuMemoryMonitor::new(Arc::downgrade(&provider), "GpuMemory".to_string())
    }

    #[test]
    fn report_is_empty_before_first_update() {
        let provider = Arc::new(FixedProvider::default());
        let monitor = monitor_for(&provider);
        assert_eq!(monitor.monitor_id(), "GpuMemory");
        assert_eq!(monitor.resource_type(), MonitoredResourceType::GpuMemory);
        assert_eq!(monitor.get_usage_report(), ResourceUsageReport::default());
    }

    #[test]
    fn update_tracks_usage_and_peak() {
        let provider = Arc::new(FixedProvider::default());
        let monitor = monitor_for(&provider);

        *provider.stats.lock().unwrap() = GpuMemoryStats {
            ring_capacity_bytes: 1024,
            ring_bytes_last_frame: 300,
            gpu_ring_capacity_bytes: 2048,
            gpu_ring_bytes_last_frame: 50,
            chunk_reserved_bytes: 4096,
            live_sub_allocation_bytes: 100,
            ..Default::default()
        };
        monitor.update();
        let report = monitor.get_usage_report();
        assert_eq!(report.current_bytes, 450);
        assert_eq!(report.peak_bytes, Some(450));
        assert_eq!(report.total_capacity_bytes, Some(7168));

        {
            let mut stats = provider.stats.lock().unwrap();
            stats.ring_bytes_last_frame = 0;
            stats.gpu_ring_bytes_last_frame = 0;
        }
        monitor.update();
        let report = monitor.get_usage_report();
        assert_eq!(report.current_bytes, 100);
        assert_eq!(report.peak_bytes, Some(450));
    }

    #[test]
    fn update_after_provider_drop_keeps_last_snapshot() {
        let provider = Arc::new(FixedProvider::default());
        let monitor = monitor_for(&provider);
        provider.stats.lock().unwrap().live_sub_allocation_bytes = 64;
        monitor.update();
        drop(provider);

        monitor.update();
        assert_eq!(monitor.get_usage_report().current_bytes, 64);
    }
}
