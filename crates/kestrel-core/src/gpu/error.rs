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

//! Error type reported by [`GpuBackend`](super::GpuBackend) implementations.

use std::fmt;

/// An error related to the creation, mapping or destruction of a GPU object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The handle does not refer to a live object.
    NotFound,
    /// The handle is malformed or of the wrong kind.
    InvalidHandle,
    /// An access went past the end of the resource.
    OutOfBounds,
    /// The device could not satisfy an allocation.
    OutOfDeviceMemory {
        /// The number of bytes that were requested.
        requested: u64,
    },
    /// The buffer could not be mapped into the CPU address space.
    MappingFailed(String),
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfBounds => write!(f, "Access out of the resource bounds."),
            ResourceError::OutOfDeviceMemory { requested } => {
                write!(f, "Out of device memory while allocating {requested} bytes.")
            }
            ResourceError::MappingFailed(msg) => write!(f, "Failed to map buffer: {msg}"),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_error_display() {
        assert_eq!(
            format!("{}", ResourceError::OutOfDeviceMemory { requested: 64 }),
            "Out of device memory while allocating 64 bytes."
        );
        assert_eq!(
            format!("{}", ResourceError::MappingFailed("not host visible".into())),
            "Failed to map buffer: not host visible"
        );
    }
}
