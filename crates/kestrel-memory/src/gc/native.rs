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

use super::{Disposer, FrameGarbageCollector};
use kestrel_core::gpu::{GarbageCategory, GpuBackend, NativeHandle};
use std::sync::Arc;

/// Destroys native objects through the backend.
#[derive(Debug)]
pub struct NativeDisposer {
    backend: Arc<dyn GpuBackend>,
}

impl NativeDisposer {
    /// Creates a disposer for objects of `backend`.
    pub fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self { backend }
    }
}

impl Disposer<NativeHandle> for NativeDisposer {
    fn dispose(&self, category: GarbageCategory, item: NativeHandle) {
        debug_assert_eq!(category, item.category());
        if let Err(e) = self.backend.destroy_native(item) {
            log::warn!("NativeDisposer: Failed to destroy {item:?}: {e:?}");
        }
    }
}

impl FrameGarbageCollector<NativeHandle> {
    /// Creates a collector that destroys native objects of `backend`.
    pub fn for_backend(backend: Arc<dyn GpuBackend>, frames_in_flight: usize) -> Self {
        Self::new(
            "native",
            frames_in_flight,
            Box::new(NativeDisposer::new(backend)),
        )
    }

    /// Queues a native object under its own category.
    pub fn enqueue_native(&self, handle: NativeHandle) {
        self.enqueue(handle.category(), handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::gpu::{BufferDescriptor, BufferUsage, TextureViewId};
    use kestrel_core::FenceHandle;
    use kestrel_infra::HeadlessBackend;

    #[test]
    fn native_garbage_is_destroyed_by_the_backend_after_retirement() {
        let backend = Arc::new(HeadlessBackend::new());
        let gc = FrameGarbageCollector::for_backend(backend.clone(), 2);

        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::STORAGE,
            })
            .unwrap();
        gc.enqueue_native(NativeHandle::Buffer(buffer));
        gc.enqueue_native(NativeHandle::TextureView(TextureViewId(9)));
        gc.attach_fence(FenceHandle::new(backend.create_fence().unwrap()));

        gc.begin_frame_and_collect();
        gc.begin_frame_and_collect();
        assert_eq!(backend.live_buffer_count(), 1);

        backend.retire_all();
        gc.begin_frame_and_collect();
        gc.begin_frame_and_collect();
        assert_eq!(
            backend.destroyed_handles(),
            vec![
                NativeHandle::TextureView(TextureViewId(9)),
                NativeHandle::Buffer(buffer)
            ]
        );
    }
}
