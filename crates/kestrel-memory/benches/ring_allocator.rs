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

use criterion::{criterion_group, criterion_main, Criterion};
use kestrel_infra::HeadlessBackend;
use kestrel_memory::RingAllocator;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

const RING_SIZE: u64 = 16 * 1024 * 1024;

fn bench_ring(c: &mut Criterion) {
    let backend = Arc::new(HeadlessBackend::new());
    let ring = RingAllocator::new(backend, RING_SIZE, 3).unwrap();

    let mut group = c.benchmark_group("Transient Ring");

    group.bench_function("1000 uniform blocks (single thread)", |b| {
        b.iter(|| {
            let frame = ring.begin_frame();
            for i in 0..1000u32 {
                let allocation = frame.allocate_copy(&[i; 16]).unwrap();
                black_box(allocation.offset());
            }
            frame.end_frame();
        });
    });

    group.bench_function("4 x 250 uniform blocks (4 threads)", |b| {
        b.iter(|| {
            let frame = ring.begin_frame();
            thread::scope(|s| {
                for _ in 0..4 {
                    s.spawn(|| {
                        for i in 0..250u32 {
                            let allocation = frame.allocate_copy(&[i; 16]).unwrap();
                            black_box(allocation.offset());
                        }
                    });
                }
            });
            frame.end_frame();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ring);
criterion_main!(benches);
