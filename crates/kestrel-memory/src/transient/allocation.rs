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

use bytemuck::Pod;
use kestrel_core::gpu::BufferId;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A range of the transient ring, valid for the frame it was allocated in.
///
/// The allocation borrows its [`TransientFrame`](super::TransientFrame), so it
/// cannot be kept past the end of that frame. The CPU side may be filled through [`as_bytes_mut`](Self::as_bytes_mut); the
/// GPU side is bound with [`buffer`](Self::buffer) and [`offset`](Self::offset).
#[derive(Debug)]
pub struct TransientAllocation<'a> {
    buffer: BufferId,
    offset: u64,
    size: u64,
    ptr: NonNull<u8>,
    _frame: PhantomData<&'a ()>,
}

// SAFETY: the allocation is the only handle to its range until the frames in
// flight retire, so moving it to another recording thread is fine.
unsafe impl Send for TransientAllocation<'_> {}

impl<'a> TransientAllocation<'a> {
    /// # Safety
    ///
    /// `ptr` must point to `size` mapped bytes that no other live allocation covers.
    pub(crate) unsafe fn new(buffer: BufferId, offset: u64, size: u64, ptr: NonNull<u8>) -> Self {
        Self {
            buffer,
            offset,
            size,
            ptr,
            _frame: PhantomData,
        }
    }

    /// The ring buffer to bind.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Byte offset of the range inside [`buffer`](Self::buffer).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the range in bytes, rounded up to the ring alignment.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The mapped range as a byte slice.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed by the contract of `new`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size as usize) }
    }

    /// Copies `bytes` into the range, starting `at` bytes from its beginning.
    ///
    /// # Panics
    ///
    /// If the write does not fit in the allocation.
    pub fn write_bytes(&mut self, at: u64, bytes: &[u8]) {
        let end = at.checked_add(bytes.len() as u64);
        assert!(
            end.is_some_and(|end| end <= self.size),
            "transient write of {} bytes at {at} overflows a {} byte allocation",
            bytes.len(),
            self.size
        );
        let start = at as usize;
        self.as_bytes_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

/// A typed write view over a [`TransientAllocation`].
///
/// Elements are written unaligned, so `T` may be stricter than the ring alignment.
#[derive(Debug)]
pub struct StructuredView<'a, T: Pod> {
    allocation: TransientAllocation<'a>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> StructuredView<'a, T> {
    pub(crate) fn with_len(allocation: TransientAllocation<'a>, len: usize) -> Self {
        debug_assert!(len * std::mem::size_of::<T>() <= allocation.size as usize);
        Self {
            allocation,
            len,
            _marker: PhantomData,
        }
    }

    /// Number of elements that fit in the range.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no element fits in the range.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes element `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn write(&mut self, index: usize, value: T) {
        assert!(index < self.len, "index {index} out of {} elements", self.len);
        let at = (index * std::mem::size_of::<T>()) as u64;
        self.allocation.write_bytes(at, bytemuck::bytes_of(&value));
    }

    /// Writes `values` starting at element 0.
    pub fn write_slice(&mut self, values: &[T]) {
        assert!(
            values.len() <= self.len,
            "{} elements do not fit in {}",
            values.len(),
            self.len
        );
        self.allocation
            .write_bytes(0, bytemuck::cast_slice(values));
    }

    /// The underlying allocation, for binding.
    pub fn allocation(&self) -> &TransientAllocation<'a> {
        &self.allocation
    }

    /// Gives the allocation back, ending typed access.
    pub fn into_allocation(self) -> TransientAllocation<'a> {
        self.allocation
    }
}
