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

use super::{AllocError, MemoryBackend, MemoryType};

/// Largest heap allocation Rust can ever serve.
const MAX_HEAP_ALLOCATION: usize = isize::MAX as usize;

/// Heap storage for entry values.
#[derive(Debug, Clone, Default)]
pub struct VolatileBackend {
    max_allocation: Option<usize>,
}

impl VolatileBackend {
    /// Create a heap backend without an allocation limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse allocations larger than `limit` bytes.
    pub fn with_max_allocation(mut self, limit: usize) -> Self {
        self.max_allocation = Some(limit);
        self
    }
}

/// Heap buffer produced by [`VolatileBackend`].
#[derive(Debug)]
pub struct VolatileBuffer(Box<[u8]>);

impl AsRef<[u8]> for VolatileBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for VolatileBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl MemoryBackend for VolatileBackend {
    type Buffer = VolatileBuffer;

    fn memory_type(&self) -> MemoryType {
        MemoryType::Volatile
    }

    fn allocate(&self, len: usize) -> Result<Self::Buffer, AllocError> {
        let limit = self.max_allocation.unwrap_or(MAX_HEAP_ALLOCATION).min(MAX_HEAP_ALLOCATION);
        if len > limit {
            return Err(AllocError::TooLarge { limit });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| AllocError::OutOfSpace)?;
        buf.resize(len, 0);
        Ok(VolatileBuffer(buf.into_boxed_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatile_allocate() {
        let backend = VolatileBackend::new();
        let mut buf = backend.allocate(16).unwrap();
        assert_eq!(buf.as_ref(), &[0u8; 16]);
        buf.as_mut().copy_from_slice(&[7u8; 16]);
        assert_eq!(buffer_sum(&buf), 7 * 16);
        assert_eq!(backend.usable_size(&buf), 16);
        backend.deallocate(buf);

        assert!(backend.allocate(0).unwrap().as_ref().is_empty());
    }

    #[test]
    fn test_volatile_allocation_limit() {
        let backend = VolatileBackend::new().with_max_allocation(1024);
        assert!(backend.allocate(1024).is_ok());
        assert_eq!(backend.allocate(1025).unwrap_err(), AllocError::TooLarge { limit: 1024 });
    }

    #[test]
    fn test_volatile_capacity_overflow() {
        let backend = VolatileBackend::new();
        let limit = isize::MAX as usize;
        assert_eq!(backend.allocate(usize::MAX).unwrap_err(), AllocError::TooLarge { limit });
        assert_eq!(backend.allocate(limit + 1).unwrap_err(), AllocError::TooLarge { limit });

        let backend = VolatileBackend::new().with_max_allocation(usize::MAX);
        assert_eq!(backend.allocate(usize::MAX).unwrap_err(), AllocError::TooLarge { limit });
    }

    fn buffer_sum(buf: &VolatileBuffer) -> usize {
        buf.as_ref().iter().map(|&b| b as usize).sum()
    }
}
