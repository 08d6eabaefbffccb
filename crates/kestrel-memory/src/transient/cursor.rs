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

use crate::error::TransientMemoryError;
use kestrel_core::MAX_FRAMES_IN_FLIGHT;
use std::sync::atomic::{AtomicU64, Ordering};

/// Rounds `value` up to `alignment`, a power of two. `None` on overflow.
pub(crate) fn align_up(value: u64, alignment: u64) -> Option<u64> {
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// The lock-free bookkeeping of a ring reused cyclically across frames.
///
/// The write cursor only grows; its value modulo the buffer size is the offset
/// of the next allocation. The cursor remembers where each frame in flight
/// started and refuses any request that would run over the oldest of them.
#[derive(Debug)]
pub(crate) struct RingCursor {
    label: &'static str,
    buffer_size: u64,
    alignment: u64,
    overcommit_warning_ratio: f64,
    write_cursor: AtomicU64,
    /// Cursor value at the start of each frame in flight, indexed by frame modulo N.
    frame_starts: Box<[AtomicU64]>,
    frame: AtomicU64,
    previous_frame_end_cursor: AtomicU64,
    last_frame_bytes: AtomicU64,
    peak_frame_bytes: AtomicU64,
    refused: AtomicU64,
    overcommitted_frames: AtomicU64,
}

impl RingCursor {
    pub(crate) fn new(
        label: &'static str,
        buffer_size: u64,
        alignment: u64,
        frames_in_flight: usize,
    ) -> Self {
        if frames_in_flight == 0 || frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            fatal!("{label}: {frames_in_flight} frames in flight is not supported");
        }
        if !alignment.is_power_of_two() {
            fatal!("{label}: backend alignment {alignment} is not a power of two");
        }
        Self {
            label,
            buffer_size,
            alignment,
            overcommit_warning_ratio: 0.8,
            write_cursor: AtomicU64::new(0),
            frame_starts: (0..frames_in_flight).map(|_| AtomicU64::new(0)).collect(),
            frame: AtomicU64::new(0),
            previous_frame_end_cursor: AtomicU64::new(0),
            last_frame_bytes: AtomicU64::new(0),
            peak_frame_bytes: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            overcommitted_frames: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_overcommit_warning_ratio(&mut self, ratio: f64) {
        self.overcommit_warning_ratio = ratio;
    }

    /// Reserves `size` bytes and returns `(offset, aligned size)`.
    pub(crate) fn reserve(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<(u64, u64), TransientMemoryError> {
        if size == 0 {
            return Err(TransientMemoryError::ZeroSized);
        }
        if !alignment.is_power_of_two() || alignment > self.alignment {
            fatal!(
                "{}: alignment {alignment} is not a power of two up to {}",
                self.label,
                self.alignment
            );
        }
        let aligned = match align_up(size, self.alignment) {
            Some(aligned) if aligned <= self.buffer_size / 2 => aligned,
            _ => fatal!(
                "{}: {size} bytes requested from a {} byte ring; the ring is too small",
                self.label,
                self.buffer_size
            ),
        };

        let ring_size = self.buffer_size;
        let mut current = self.write_cursor.load(Ordering::Relaxed);
        loop {
            let offset = current % ring_size;
            // Never straddle the end: abandon the tail and restart at the boundary.
            let start = if offset + aligned > ring_size {
                current + (ring_size - offset)
            } else {
                current
            };
            let end = start + aligned;

            let oldest = self.oldest_in_flight_start();
            if end - oldest > ring_size {
                self.refused.fetch_add(1, Ordering::Relaxed);
                return Err(TransientMemoryError::OutOfMemory {
                    requested: aligned,
                    available: (oldest + ring_size).saturating_sub(current),
                });
            }

            match self.write_cursor.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok((start % ring_size, aligned)),
                Err(actual) => current = actual,
            }
        }
    }

    fn oldest_in_flight_start(&self) -> u64 {
        let frame = self.frame.load(Ordering::Acquire);
        let n = self.frame_starts.len() as u64;
        self.frame_starts[((frame + 1) % n) as usize].load(Ordering::Acquire)
    }

    /// Closes the current frame and returns the bytes it consumed.
    pub(crate) fn end_frame(&self) -> u64 {
        let cursor = self.write_cursor.load(Ordering::Acquire);
        let previous = self.previous_frame_end_cursor.swap(cursor, Ordering::AcqRel);
        let used = cursor - previous;

        let next = self.frame.load(Ordering::Acquire) + 1;
        let n = self.frame_starts.len() as u64;
        self.frame_starts[(next % n) as usize].store(cursor, Ordering::Release);
        self.frame.store(next, Ordering::Release);

        self.last_frame_bytes.store(used, Ordering::Relaxed);
        self.peak_frame_bytes.fetch_max(used, Ordering::Relaxed);

        let fair_share = self.buffer_size as f64 / n as f64;
        if used as f64 > self.overcommit_warning_ratio * fair_share {
            self.overcommitted_frames.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "{}: frame {} used {used} bytes, more than {:.0}% of its {fair_share:.0} byte share",
                self.label,
                next - 1,
                self.overcommit_warning_ratio * 100.0
            );
        } else {
            log::trace!("{}: frame {} used {used} bytes", self.label, next - 1);
        }
        used
    }

    pub(crate) fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub(crate) fn alignment(&self) -> u64 {
        self.alignment
    }

    pub(crate) fn frames_in_flight(&self) -> usize {
        self.frame_starts.len()
    }

    pub(crate) fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub(crate) fn last_frame_bytes(&self) -> u64 {
        self.last_frame_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn peak_frame_bytes(&self) -> u64 {
        self.peak_frame_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn refused_allocations(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    pub(crate) fn overcommitted_frames(&self) -> u64 {
        self.overcommitted_frames.load(Ordering::Relaxed)
    }
}
