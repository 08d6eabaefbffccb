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

use kestrel_infra::HeadlessBackend;
use kestrel_memory::{RingAllocator, TransientMemoryError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

fn ring(size: u64, alignment: u64, frames: usize) -> (Arc<HeadlessBackend>, RingAllocator) {
    let backend = Arc::new(HeadlessBackend::with_uniform_alignment(alignment));
    let ring = RingAllocator::new(backend.clone(), size, frames).unwrap();
    (backend, ring)
}

fn overlaps(a: (u64, u64), b: (u64, u64)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

#[test]
fn test_wrapping_allocation_waits_for_the_frames_it_would_overwrite() {
    // --- 1. ARRANGE ---
    let (_backend, ring) = ring(1024, 16, 3);

    // Frame 0: thread A.
    let frame = ring.begin_frame();
    let a = frame.allocate(300, 16).unwrap();
    assert_eq!((a.offset(), a.size()), (0, 304));
    frame.end_frame();

    // Frame 1: thread B.
    let frame = ring.begin_frame();
    let b = frame.allocate(300, 16).unwrap();
    assert_eq!((b.offset(), b.size()), (304, 304));
    frame.end_frame();

    // --- 2. ACT & 3. ASSERT ---
    // Frame 2: the request straddles the end and would land on A's data.
    let frame = ring.begin_frame();
    match frame.allocate(500, 16) {
        Err(TransientMemoryError::OutOfMemory { requested, .. }) => assert_eq!(requested, 512),
        Ok(c) => panic!("frame 2 got {:?} while frame 0 is in flight", (c.offset(), c.size())),
        Err(e) => panic!("unexpected error: {e}"),
    }
    frame.end_frame();

    // Frame 3: frame 0 retired, but the range still reaches into B's data.
    let frame = ring.begin_frame();
    assert!(frame.allocate(500, 16).is_err());
    frame.end_frame();

    // Frame 4: both A and B retired.
    let frame = ring.begin_frame();
    let c = frame.allocate(500, 16).unwrap();
    assert_eq!((c.offset(), c.size()), (0, 512));
    assert_eq!(ring.refused_allocations(), 2);
}

#[test]
fn test_refused_allocation_leaves_room_for_smaller_ones() {
    let (_backend, ring) = ring(1024, 16, 2);
    let frame = ring.begin_frame();
    let _ = frame.allocate(400, 16).unwrap();
    let _ = frame.allocate(400, 16).unwrap();
    frame.end_frame();

    // Frame 1: the tail is too short, and wrapping would overrun frame 0.
    let frame = ring.begin_frame();
    assert!(frame.allocate(400, 16).is_err());
    let small = frame.allocate(16, 16).unwrap();
    assert_eq!(small.offset(), 800);
}

#[test]
fn test_frame_over_its_share_is_counted_as_overcommitted() {
    // Two frames in flight: each may use 2048 bytes, the warning starts above 1638.
    let (_backend, ring) = ring(4096, 16, 2);

    let frame = ring.begin_frame();
    for _ in 0..3 {
        frame.allocate(600, 16).unwrap();
    }
    assert_eq!(frame.end_frame(), 3 * 608);
    assert_eq!(ring.overcommitted_frames(), 1);

    let frame = ring.begin_frame();
    frame.allocate(1000, 16).unwrap();
    frame.end_frame();
    assert_eq!(ring.overcommitted_frames(), 1);
    assert_eq!(ring.peak_frame_bytes(), 3 * 608);
}

#[test]
fn test_overcommit_ratio_is_configurable() {
    let backend = Arc::new(HeadlessBackend::with_uniform_alignment(16));
    let ring = RingAllocator::new(backend, 4096, 2)
        .unwrap()
        .with_overcommit_warning_ratio(0.25);

    let frame = ring.begin_frame();
    frame.allocate(600, 16).unwrap();
    frame.end_frame();
    assert_eq!(ring.overcommitted_frames(), 1);
}

#[test]
fn test_recording_threads_share_one_frame() {
    let (backend, ring) = ring(16 * 1024, 16, 2);
    let frame = ring.begin_frame();
    std::thread::scope(|s| {
        for tag in 1..=4u8 {
            let frame = &frame;
            s.spawn(move || {
                for _ in 0..8 {
                    let mut allocation = frame.allocate(48, 16).unwrap();
                    allocation.as_bytes_mut().fill(tag);
                }
            });
        }
    });
    let used = frame.end_frame();
    assert_eq!(used, 4 * 8 * 48);

    let bytes = backend.read_bytes(ring.buffer(), 0, used).unwrap();
    for tag in 1..=4u8 {
        assert_eq!(bytes.iter().filter(|&&b| b == tag).count(), 8 * 48);
    }
}

#[test]
fn test_randomized_frames_never_overwrite_data_in_flight() {
    const FRAMES_IN_FLIGHT: usize = 3;

    // --- 1. ARRANGE ---
    let mut rng = StdRng::seed_from_u64(0x6b65_7374);
    let (backend, ring) = ring(4096, 16, FRAMES_IN_FLIGHT);
    // Per frame: (offset, size, tag) of every allocation made in that frame.
    let mut in_flight: VecDeque<Vec<(u64, u64, u8)>> = VecDeque::new();
    let mut next_tag: u8 = 1;
    let mut refused = 0;

    for _frame in 0..500 {
        // --- 2. ACT ---
        let frame = ring.begin_frame();
        let mut current = Vec::new();
        for _ in 0..rng.gen_range(0..8) {
            let size = rng.gen_range(1..=1024u64);
            match frame.allocate(size, 16) {
                Ok(mut allocation) => {
                    let tag = next_tag;
                    next_tag = next_tag.wrapping_add(1).max(1);
                    allocation.as_bytes_mut().fill(tag);
                    current.push((allocation.offset(), allocation.size(), tag));
                }
                Err(TransientMemoryError::OutOfMemory { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        // --- 3. ASSERT ---
        for (offset, size, _) in &current {
            for frame in &in_flight {
                for &(other_offset, other_size, _) in frame {
                    assert!(
                        !overlaps((*offset, *size), (other_offset, other_size)),
                        "[{offset}, +{size}) overlaps a range of a frame in flight"
                    );
                }
            }
        }
        in_flight.push_back(current);
        for recorded in &in_flight {
            for &(offset, size, tag) in recorded {
                let bytes = backend.read_bytes(ring.buffer(), offset, size).unwrap();
                assert!(bytes.iter().all(|&b| b == tag), "range at {offset} was overwritten");
            }
        }

        frame.end_frame();
        // The GPU consumed the oldest frame once N frames are recorded.
        if in_flight.len() == FRAMES_IN_FLIGHT {
            in_flight.pop_front();
        }
    }

    assert_eq!(ring.refused_allocations(), refused);
    assert!(refused > 0, "the workload never filled the ring");
}
