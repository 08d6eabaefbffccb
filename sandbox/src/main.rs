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

// Kestrel Sandbox
// Drives a GpuMemoryContext over simulated frames on the headless backend.
//
// Usage: sandbox [settings.json]

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread;

use anyhow::{Context, Result};
use kestrel_core::gpu::{GpuBackend, NativeHandle, SemaphoreKind, SwapchainDescriptor};
use kestrel_core::telemetry::{GpuMemoryStatsProvider, ResourceMonitor};
use kestrel_core::GpuMemorySettings;
use kestrel_infra::{GpuMemoryMonitor, HeadlessBackend};
use kestrel_memory::{FrameScope, GpuMemoryContext, SubAllocation, SwapchainFactory};

const FRAMES: u64 = 240;
const RECORDING_THREADS: usize = 4;
const DRAWS_PER_THREAD: usize = 32;
const RESIZE_AT_FRAME: u64 = 120;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniforms {
    model: [[f32; 4]; 4],
    tint: [f32; 4],
}

const TRIANGLE: &[Vertex] = &[
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

fn load_settings() -> Result<GpuMemorySettings> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(GpuMemorySettings::default());
    };
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read '{path}'"))?;
    let settings = GpuMemorySettings::from_json(&text)?;
    log::info!("Sandbox: settings loaded from '{path}'");
    Ok(settings)
}

/// Records the draws of one thread and returns the transient bytes it wrote.
fn record(scope: &FrameScope<'_>, frame: u64, thread_index: usize) -> Result<u64> {
    let mut written = 0;
    for draw in 0..DRAWS_PER_THREAD {
        let vertices = scope.allocate_copy(TRIANGLE)?;
        written += vertices.size();

        let mut uniforms = scope.allocate_structured::<DrawUniforms>(1)?;
        let offset = (thread_index * DRAWS_PER_THREAD + draw) as f32;
        uniforms.write(
            0,
            DrawUniforms {
                model: [
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0, 0.0],
                    [offset, (frame % 60) as f32, 0.0, 1.0],
                ],
                tint: [1.0; 4],
            },
        );
        written += uniforms.allocation().size();
    }
    Ok(written)
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = load_settings()?;
    let lag = settings.frames_in_flight;
    let recycler_settings = settings.recycler;
    let backend = Arc::new(HeadlessBackend::new());
    let context = Arc::new(GpuMemoryContext::new(backend.clone(), settings)?);

    let provider: Weak<dyn GpuMemoryStatsProvider> = Arc::downgrade(&context) as Weak<GpuMemoryContext>;
    let monitor = GpuMemoryMonitor::new(provider, "GpuMemory_Sandbox".to_string());

    let swapchains = SwapchainFactory::new(
        backend.clone(),
        SwapchainDescriptor {
            width: 1280,
            height: 720,
            image_count: 3,
            vsync: true,
        },
        recycler_settings,
    );

    let mut submitted: VecDeque<u64> = VecDeque::new();
    // Meshes streamed in for a few seconds of simulated time.
    let mut streamed: VecDeque<(u64, SubAllocation)> = VecDeque::new();

    for frame in 0..FRAMES {
        let fence = context.new_fence()?;
        let serial = backend.timeline().issued();
        let present = context.new_semaphore(SemaphoreKind::Binary)?;
        let mut compute = context.new_semaphore(SemaphoreKind::Timeline)?;
        let compute_value = compute.next_signal_value();

        if frame == RESIZE_AT_FRAME {
            swapchains.reconfigure(SwapchainDescriptor {
                width: 1920,
                height: 1080,
                ..swapchains.descriptor()
            });
        }
        let swapchain = swapchains.new_swapchain()?;

        let scope = context.begin_frame();
        let recorded: u64 = thread::scope(|s| {
            let workers: Vec<_> = (0..RECORDING_THREADS)
                .map(|t| {
                    let scope = &scope;
                    s.spawn(move || record(scope, frame, t))
                })
                .collect();
            workers
                .into_iter()
                .map(|w| {
                    w.join()
                        .map_err(|_| anyhow::anyhow!("recording thread panicked"))
                        .and_then(|recorded| recorded)
                })
                .sum::<Result<u64>>()
        })?;
        // Post-processing scratch only the GPU touches.
        let scratch_target = scope.allocate_gpu_transient(256 * 1024, 256)?;

        if frame % 8 == 0 {
            let size = 1024 << (frame / 8 % 6);
            streamed.push_back((frame, context.allocate_chunked(size)?));
        }
        while streamed.front().is_some_and(|(born, _)| frame - born >= 60) {
            if let Some((_, mesh)) = streamed.pop_front() {
                context.deferred_free_chunked(mesh);
            }
        }

        // A throwaway semaphore per frame goes through deferred destruction.
        let scratch = backend.create_semaphore(SemaphoreKind::Binary)?;
        context.enqueue_garbage(NativeHandle::Semaphore(scratch));

        context.attach_frame_fence(fence.clone());
        context.release_semaphore(present, fence.clone());
        context.release_semaphore(compute, fence.clone());
        swapchains.release_swapchain(swapchain, fence);
        let used = scope.end_frame();
        log::trace!(
            "Sandbox: frame {frame} recorded {recorded} bytes ({used} consumed), compute signals {compute_value}, scratch at {}",
            scratch_target.offset
        );

        submitted.push_back(serial);
        if submitted.len() == lag {
            if let Some(oldest) = submitted.pop_front() {
                backend.retire_through(oldest);
            }
        }
        context.collect_garbage_for_new_frame();

        if frame % 60 == 59 {
            context.trim_chunks();
            monitor.update();
            let report = monitor.get_usage_report();
            log::info!(
                "Sandbox: frame {frame}: {} bytes in use, peak {:?}, capacity {:?}",
                report.current_bytes,
                report.peak_bytes,
                report.total_capacity_bytes
            );
        }
    }

    for (_, mesh) in streamed {
        context.deferred_free_chunked(mesh);
    }
    backend.retire_all();
    context.finish();
    log::info!(
        "Sandbox: {} swap chains cached at {:?}",
        swapchains.cached_count(),
        swapchains.descriptor()
    );

    let stats = context.stats();
    log::info!("Sandbox: final stats {stats:#?}");
    log::info!(
        "Sandbox: {} fences created for {FRAMES} frames, peak {} bytes allocated",
        backend.fences_created(),
        backend.peak_allocated_bytes()
    );
    Ok(())
}
