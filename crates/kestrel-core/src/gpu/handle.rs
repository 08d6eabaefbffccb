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

//! Opaque handles to native GPU objects and the categories used to destroy them.

use super::BufferId;

/// An opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

/// An opaque handle to a view into a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewId(pub usize);

/// An opaque handle to a typed view into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewId(pub usize);

/// An opaque handle to a ray-tracing acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccelerationStructureId(pub usize);

/// An opaque handle to a texture sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(pub usize);

/// An opaque handle to a GPU-GPU semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreId(pub usize);

/// The two flavors of GPU-GPU semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaphoreKind {
    /// Signaled and waited once per submission.
    Binary,
    /// Carries a monotonically increasing 64-bit value.
    Timeline,
}

/// An opaque handle to a presentation swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainId(pub usize);

/// Parameters of a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainDescriptor {
    /// Width of the presentable images in pixels.
    pub width: u32,
    /// Height of the presentable images in pixels.
    pub height: u32,
    /// Number of presentable images.
    pub image_count: u32,
    /// Whether presentation waits for the vertical blank.
    pub vsync: bool,
}

/// The kind of object waiting in a garbage slot.
///
/// The declaration order is the destruction order inside one slot: views go
/// before the resources they alias, and raw memory goes last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GarbageCategory {
    /// Texture views.
    TextureView,
    /// Buffer views.
    BufferView,
    /// Acceleration structures.
    AccelerationStructure,
    /// Textures.
    Texture,
    /// Buffers.
    Buffer,
    /// Samplers.
    Sampler,
    /// Semaphores.
    Semaphore,
    /// Swap chains.
    Swapchain,
    /// Sub-allocations of larger memory blocks.
    Memory,
}

impl GarbageCategory {
    /// The number of categories.
    pub const COUNT: usize = 9;

    /// All categories, in destruction order.
    pub const ALL: [GarbageCategory; Self::COUNT] = [
        GarbageCategory::TextureView,
        GarbageCategory::BufferView,
        GarbageCategory::AccelerationStructure,
        GarbageCategory::Texture,
        GarbageCategory::Buffer,
        GarbageCategory::Sampler,
        GarbageCategory::Semaphore,
        GarbageCategory::Swapchain,
        GarbageCategory::Memory,
    ];

    /// Position of this category in [`GarbageCategory::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A native object the backend knows how to destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeHandle {
    /// A buffer.
    Buffer(BufferId),
    /// A buffer view.
    BufferView(BufferViewId),
    /// A texture.
    Texture(TextureId),
    /// A texture view.
    TextureView(TextureViewId),
    /// An acceleration structure.
    AccelerationStructure(AccelerationStructureId),
    /// A sampler.
    Sampler(SamplerId),
    /// A semaphore.
    Semaphore(SemaphoreId),
    /// A swap chain.
    Swapchain(SwapchainId),
}

impl NativeHandle {
    /// The garbage category this handle is queued under.
    pub const fn category(&self) -> GarbageCategory {
        match self {
            NativeHandle::Buffer(_) => GarbageCategory::Buffer,
            NativeHandle::BufferView(_) => GarbageCategory::BufferView,
            NativeHandle::Texture(_) => GarbageCategory::Texture,
            NativeHandle::TextureView(_) => GarbageCategory::TextureView,
            NativeHandle::AccelerationStructure(_) => GarbageCategory::AccelerationStructure,
            NativeHandle::Sampler(_) => GarbageCategory::Sampler,
            NativeHandle::Semaphore(_) => GarbageCategory::Semaphore,
            NativeHandle::Swapchain(_) => GarbageCategory::Swapchain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_indices_follow_destruction_order() {
        for (i, category) in GarbageCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
        }
        assert!(GarbageCategory::TextureView < GarbageCategory::Texture);
        assert!(GarbageCategory::Buffer < GarbageCategory::Memory);
        assert!(GarbageCategory::Swapchain < GarbageCategory::Memory);
    }

    #[test]
    fn native_handle_category() {
        assert_eq!(
            NativeHandle::Buffer(BufferId(3)).category(),
            GarbageCategory::Buffer
        );
        assert_eq!(
            NativeHandle::TextureView(TextureViewId(1)).category(),
            GarbageCategory::TextureView
        );
    }
}
