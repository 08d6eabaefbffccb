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

//! Error types of the memory subsystem.
//!
//! These are the recoverable, hot-path failures. Programmer errors (oversized
//! requests, leaked recycled objects, a GPU that never finishes) are fatal and
//! never show up here.

use kestrel_core::{ConfigError, ResourceError};
use thiserror::Error;

/// Failure of a transient ring allocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransientMemoryError {
    /// The frames still in flight own the space the request needs.
    #[error("transient ring exhausted: {requested} bytes requested, {available} bytes free this frame")]
    OutOfMemory {
        /// Aligned size of the refused request.
        requested: u64,
        /// Bytes that could still be handed out this frame.
        available: u64,
    },
    /// A zero-byte allocation was requested.
    #[error("zero-sized transient allocation")]
    ZeroSized,
}

/// Failure of a chunk pool allocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkPoolError {
    /// Every chunk of the size class is full and no new chunk may be created.
    #[error("chunk limit of {limit} reached while allocating {requested} bytes")]
    ChunkLimitReached {
        /// The configured chunk ceiling.
        limit: usize,
        /// The requested size.
        requested: u64,
    },
    /// The request is larger than a whole chunk.
    #[error("{requested} bytes exceed the chunk size of {chunk_size} bytes")]
    TooLarge {
        /// The requested size.
        requested: u64,
        /// The configured chunk size.
        chunk_size: u64,
    },
    /// A zero-byte allocation was requested.
    #[error("zero-sized chunk allocation")]
    ZeroSized,
    /// The backend could not create a new chunk.
    #[error("failed to create chunk: {0}")]
    Backend(#[from] ResourceError),
}

/// Failure to build or drive a `GpuMemoryContext`.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The settings are inconsistent.
    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),
    /// The backend refused to create a resource the context needs.
    #[error("backend error: {0}")]
    Resource(#[from] ResourceError),
    /// A transient allocation failed.
    #[error(transparent)]
    Transient(#[from] TransientMemoryError),
    /// A chunk pool allocation failed.
    #[error(transparent)]
    Chunk(#[from] ChunkPoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_sizes() {
        let err = TransientMemoryError::OutOfMemory {
            requested: 512,
            available: 96,
        };
        assert_eq!(
            err.to_string(),
            "transient ring exhausted: 512 bytes requested, 96 bytes free this frame"
        );

        let err: ContextError = ChunkPoolError::ChunkLimitReached {
            limit: 4,
            requested: 64,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "chunk limit of 4 reached while allocating 64 bytes"
        );
    }
}
