// Copyright 2026 blockcache Project Authors
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

//! Storage backends for entry values.
//!
//! Everything above this module only sees [`MemoryBackend`] and its [`ValueBuffer`]s, so the shard and cache logic
//! stays the same no matter where value bytes live.

mod volatile;
#[cfg(unix)]
mod persistent;

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

#[cfg(unix)]
pub use self::persistent::{PersistentBackend, PersistentBuffer, PMEM_ALIGN};
pub use self::volatile::{VolatileBackend, VolatileBuffer};

/// Kind of memory that holds entry values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Ordinary process heap.
    #[default]
    Volatile,
    /// A memory-mapped pool backed by a file on a persistent memory device.
    Persistent,
}

impl Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Volatile => write!(f, "volatile"),
            MemoryType::Persistent => write!(f, "persistent"),
        }
    }
}

/// Reason a backend refused an allocation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The request exceeds the largest allocation the backend accepts.
    #[error("allocation exceeds limit {limit}")]
    TooLarge {
        /// Largest accepted allocation.
        limit: usize,
    },
    /// The backend has no room left. Evicting entries may help.
    #[error("out of space")]
    OutOfSpace,
}

/// Value storage handed out by a [`MemoryBackend`].
///
/// Dropping a buffer returns its storage to the backend that produced it.
pub trait ValueBuffer: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static {}

impl<T> ValueBuffer for T where T: AsRef<[u8]> + AsMut<[u8]> + Send + Sync + 'static {}

/// Allocator strategy for entry values, selected once per cache.
pub trait MemoryBackend: Send + Sync + 'static + Debug {
    /// Buffer type produced by the backend.
    type Buffer: ValueBuffer;

    /// Kind of memory this backend manages.
    fn memory_type(&self) -> MemoryType;

    /// Allocate a buffer of exactly `len` bytes.
    ///
    /// The initial content of the buffer is unspecified.
    fn allocate(&self, len: usize) -> Result<Self::Buffer, AllocError>;

    /// Return a buffer to the backend.
    fn deallocate(&self, buffer: Self::Buffer) {
        drop(buffer);
    }

    /// Bytes actually reserved for `buffer`, including any rounding done by the backend.
    fn usable_size(&self, buffer: &Self::Buffer) -> usize {
        buffer.as_ref().len()
    }
}
