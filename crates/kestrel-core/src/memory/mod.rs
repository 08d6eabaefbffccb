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

//! Snapshot of GPU memory usage as seen by the memory subsystem.
//!
//! Unlike process-wide allocation counters, these numbers are owned by one
//! `GpuMemoryContext`: two contexts on two devices report independently.

/// A snapshot of the transient ring, chunk pool, garbage and recycler state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuMemoryStats {
    // --- Transient ring ---
    /// Size of the transient ring buffer in bytes.
    pub ring_capacity_bytes: u64,
    /// Bytes handed out by the ring during the last completed frame.
    pub ring_bytes_last_frame: u64,
    /// Largest per-frame ring usage observed so far.
    pub ring_peak_frame_bytes: u64,
    /// Allocations the ring refused because the frames in flight still own the space.
    pub ring_refused_allocations: u64,
    /// Frames that used more than the warning share of their fair share of the ring.
    pub ring_overcommitted_frames: u64,

    // --- GPU-only transient ring ---
    /// Size of the device-local transient ring in bytes.
    pub gpu_ring_capacity_bytes: u64,
    /// Bytes handed out by the device-local ring during the last completed frame.
    pub gpu_ring_bytes_last_frame: u64,
    /// Allocations the device-local ring refused.
    pub gpu_ring_refused_allocations: u64,

    // --- Chunk pool ---
    /// Number of chunks currently alive.
    pub chunk_count: usize,
    /// Bytes reserved by live chunks.
    pub chunk_reserved_bytes: u64,
    /// Sub-allocations handed out and not yet returned to their chunk.
    pub live_sub_allocations: usize,
    /// Bytes covered by live sub-allocations.
    pub live_sub_allocation_bytes: u64,

    // --- Deferred destruction ---
    /// Native objects waiting for their frame to retire.
    pub pending_garbage: usize,

    // --- Recyclers ---
    /// Fences parked in the fence recycler.
    pub cached_fences: usize,
    /// Semaphores parked in the semaphore recycler, both kinds together.
    pub cached_semaphores: usize,

    // --- Calculated Metrics ---
    /// Share of the reserved chunk memory that is actually handed out.
    pub chunk_utilization: f64,
    /// Share of the ring that the last frame consumed.
    pub ring_frame_utilization: f64,
}

impl GpuMemoryStats {
    /// Populates the derived metrics based on the raw counter values.
    pub fn calculate_derived_metrics(&mut self) {
        if self.chunk_reserved_bytes > 0 {
            self.chunk_utilization =
                self.live_sub_allocation_bytes as f64 / self.chunk_reserved_bytes as f64;
        }
        if self.ring_capacity_bytes > 0 {
            self.ring_frame_utilization =
                self.ring_bytes_last_frame as f64 / self.ring_capacity_bytes as f64;
        }
    }

    /// Total GPU bytes reserved by the subsystem.
    pub fn reserved_bytes(&self) -> u64 {
        self.ring_capacity_bytes + self.gpu_ring_capacity_bytes + self.chunk_reserved_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_metrics() {
        let mut stats = GpuMemoryStats {
            ring_capacity_bytes: 1000,
            ring_bytes_last_frame: 250,
            gpu_ring_capacity_bytes: 600,
            chunk_reserved_bytes: 400,
            live_sub_allocation_bytes: 100,
            ..Default::default()
        };
        stats.calculate_derived_metrics();
        assert_eq!(stats.ring_frame_utilization, 0.25);
        assert_eq!(stats.chunk_utilization, 0.25);
        assert_eq!(stats.reserved_bytes(), 2000);
    }

    #[test]
    fn derived_metrics_of_empty_stats_stay_zero() {
        let mut stats = GpuMemoryStats::default();
        stats.calculate_derived_metrics();
        assert_eq!(stats.chunk_utilization, 0.0);
        assert_eq!(stats.ring_frame_utilization, 0.0);
    }
}
