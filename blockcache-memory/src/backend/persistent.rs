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

use std::{
    collections::BTreeMap,
    fmt::Debug,
    fs::File,
    os::fd::AsRawFd,
    path::Path,
    ptr::NonNull,
    sync::Arc,
};

use blockcache_common::strict_assert;
use parking_lot::Mutex;

use super::{AllocError, MemoryBackend, MemoryType};
use crate::error::{Error, Result};

/// Allocation granularity of the pool.
pub const PMEM_ALIGN: usize = 64;

/// Free extents keyed by offset. Adjacent extents are always merged.
#[derive(Debug, Default)]
struct FreeList {
    extents: BTreeMap<usize, usize>,
    free: usize,
}

impl FreeList {
    fn take(&mut self, size: usize) -> Option<usize> {
        let (offset, len) = self
            .extents
            .iter()
            .find(|(_, &len)| len >= size)
            .map(|(&offset, &len)| (offset, len))?;
        self.extents.remove(&offset);
        if len > size {
            self.extents.insert(offset + size, len - size);
        }
        self.free -= size;
        Some(offset)
    }

    fn give(&mut self, mut offset: usize, mut len: usize) {
        self.free += len;

        if let Some((&prev, &prev_len)) = self.extents.range(..offset).next_back() {
            strict_assert!(prev + prev_len <= offset);
            if prev + prev_len == offset {
                self.extents.remove(&prev);
                offset = prev;
                len += prev_len;
            }
        }
        if let Some((&next, &next_len)) = self.extents.range(offset + len..).next() {
            if offset + len == next {
                self.extents.remove(&next);
                len += next_len;
            }
        }
        self.extents.insert(offset, len);
    }
}

struct PmemPool {
    base: NonNull<u8>,
    capacity: usize,
    free: Mutex<FreeList>,
    // Keeps the mapping's backing file open. The file is unlinked on creation.
    _file: File,
}

// The mapping is only accessed through non-overlapping extents handed out under the free list lock.
unsafe impl Send for PmemPool {}
unsafe impl Sync for PmemPool {}

impl Debug for PmemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmemPool")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("free", &self.free.lock().free)
            .finish()
    }
}

impl PmemPool {
    fn open(dir: &Path, capacity: usize) -> Result<Self> {
        let capacity = capacity - capacity % PMEM_ALIGN;
        if capacity == 0 {
            return Err(Error::config(format!(
                "persistent pool capacity must be at least {PMEM_ALIGN} bytes"
            )));
        }

        let file = tempfile::tempfile_in(dir)?;
        file.set_len(capacity as u64)?;

        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let base = NonNull::new(addr as *mut u8).ok_or_else(|| Error::config("mmap returned a null address"))?;

        let mut free = FreeList::default();
        free.give(0, capacity);

        tracing::debug!(
            "[pmem]: mapped pool of {} bytes in {}",
            capacity,
            dir.display()
        );

        Ok(Self {
            base,
            capacity,
            free: Mutex::new(free),
            _file: file,
        })
    }
}

impl Drop for PmemPool {
    fn drop(&mut self) {
        let res = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.capacity) };
        if res != 0 {
            tracing::warn!(
                "[pmem]: failed to unmap pool: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Value storage carved out of a persistent memory pool.
///
/// The extent goes back to the pool when the buffer is dropped.
pub struct PersistentBuffer {
    pool: Arc<PmemPool>,
    offset: usize,
    len: usize,
    reserved: usize,
}

impl Debug for PersistentBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl AsRef<[u8]> for PersistentBuffer {
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.pool.base.as_ptr().add(self.offset), self.len) }
    }
}

impl AsMut<[u8]> for PersistentBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.pool.base.as_ptr().add(self.offset), self.len) }
    }
}

impl Drop for PersistentBuffer {
    fn drop(&mut self) {
        self.pool.free.lock().give(self.offset, self.reserved);
    }
}

/// Entry value storage in a file-backed memory pool, as found on persistent memory devices.
///
/// Only value bytes live in the pool. Keys and bookkeeping stay on the heap and nothing survives a restart.
#[derive(Debug, Clone)]
pub struct PersistentBackend {
    pool: Arc<PmemPool>,
}

impl PersistentBackend {
    /// Map a pool of `capacity` bytes backed by an unlinked file created in `dir`.
    pub fn open(dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let pool = PmemPool::open(dir.as_ref(), capacity)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Usable size of the pool in bytes.
    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }

    /// Bytes not handed out to any buffer.
    pub fn free_bytes(&self) -> usize {
        self.pool.free.lock().free
    }
}

impl MemoryBackend for PersistentBackend {
    type Buffer = PersistentBuffer;

    fn memory_type(&self) -> MemoryType {
        MemoryType::Persistent
    }

    fn allocate(&self, len: usize) -> std::result::Result<Self::Buffer, AllocError> {
        let reserved = len
            .max(1)
            .checked_next_multiple_of(PMEM_ALIGN)
            .ok_or(AllocError::TooLarge {
                limit: self.pool.capacity,
            })?;
        if reserved > self.pool.capacity {
            return Err(AllocError::TooLarge {
                limit: self.pool.capacity,
            });
        }

        let offset = self.pool.free.lock().take(reserved).ok_or(AllocError::OutOfSpace)?;
        Ok(PersistentBuffer {
            pool: self.pool.clone(),
            offset,
            len,
            reserved,
        })
    }

    fn usable_size(&self, buffer: &Self::Buffer) -> usize {
        buffer.reserved
    }
}
