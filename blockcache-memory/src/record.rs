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
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bitflags::bitflags;

use crate::backend::MemoryBackend;

/// Callback invoked exactly once with the key and value of an entry when its storage is reclaimed.
///
/// Reclamation happens after the entry left the cache and the last handle was released. The callback runs on the
/// releasing thread without any shard lock held, so it may call back into the cache.
pub trait EvictionCallback: Send + Sync + 'static {
    /// Called with the key and value bytes of the reclaimed entry.
    fn on_evict(&self, key: &[u8], value: &[u8]);
}

impl<F> EvictionCallback for F
where
    F: Fn(&[u8], &[u8]) + Send + Sync + 'static,
{
    fn on_evict(&self, key: &[u8], value: &[u8]) {
        self(key, value)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        const IN_CACHE = 0b00000001;
        const IN_EVICTION = 0b00000010;
    }
}

pub struct Data<B>
where
    B: MemoryBackend,
{
    pub key: Box<[u8]>,
    pub value: B::Buffer,
    pub hash: u64,
    pub charge: usize,
}

/// [`Record`] holds the information of the cached entry.
///
/// `refs` counts the handles of the entry plus one while the entry is in the cache.
pub struct Record<B>
where
    B: MemoryBackend,
{
    data: Data<B>,
    callback: Option<Arc<dyn EvictionCallback>>,
    refs: AtomicUsize,
    flags: AtomicU64,
}

impl<B> Debug for Record<B>
where
    B: MemoryBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("hash", &self.data.hash)
            .field("charge", &self.data.charge)
            .field("refs", &self.refs())
            .finish()
    }
}

impl<B> Record<B>
where
    B: MemoryBackend,
{
    /// Create a record with data.
    pub fn new(data: Data<B>, callback: Option<Arc<dyn EvictionCallback>>) -> Self {
        Record {
            data,
            callback,
            refs: AtomicUsize::new(0),
            flags: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.data.key
    }

    pub fn value(&self) -> &[u8] {
        self.data.value.as_ref()
    }

    pub fn hash(&self) -> u64 {
        self.data.hash
    }

    pub fn charge(&self) -> usize {
        self.data.charge
    }

    /// Run the eviction callback of the record, if any.
    pub fn notify(&self) {
        if let Some(callback) = self.callback.as_ref() {
            callback.on_evict(self.key(), self.value());
        }
    }

    /// Set in eviction flag with release memory order.
    pub fn set_in_eviction(&self, val: bool) {
        self.set_flags(Flags::IN_EVICTION, val, Ordering::Release);
    }

    /// Get in eviction flag with acquire memory order.
    pub fn is_in_eviction(&self) -> bool {
        self.get_flags(Flags::IN_EVICTION, Ordering::Acquire)
    }

    /// Set in cache flag with release memory order.
    pub fn set_in_cache(&self, val: bool) {
        self.set_flags(Flags::IN_CACHE, val, Ordering::Release);
    }

    /// Get in cache flag with acquire memory order.
    pub fn is_in_cache(&self) -> bool {
        self.get_flags(Flags::IN_CACHE, Ordering::Acquire)
    }

    pub fn set_flags(&self, flags: Flags, val: bool, order: Ordering) {
        match val {
            true => self.flags.fetch_or(flags.bits(), order),
            false => self.flags.fetch_and(!flags.bits(), order),
        };
    }

    pub fn get_flags(&self, flags: Flags, order: Ordering) -> bool {
        self.flags.load(order) & flags.bits() == flags.bits()
    }

    /// Get the atomic reference count.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Increase the atomic reference count.
    ///
    /// This function returns the new reference count after the op.
    pub fn inc_refs(&self, val: usize) -> usize {
        let old = self.refs.fetch_add(val, Ordering::SeqCst);
        tracing::trace!(
            "[record]: inc record (hash: {}) refs: {} => {}",
            self.hash(),
            old,
            old + val
        );
        old + val
    }

    /// Decrease the atomic reference count.
    ///
    /// This function returns the new reference count after the op.
    pub fn dec_refs(&self, val: usize) -> usize {
        let old = self.refs.fetch_sub(val, Ordering::SeqCst);
        tracing::trace!(
            "[record]: dec record (hash: {}) refs: {} => {}",
            self.hash(),
            old,
            old - val
        );
        old - val
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::backend::VolatileBackend;

    fn record(callback: Option<Arc<dyn EvictionCallback>>) -> Record<VolatileBackend> {
        let mut value = VolatileBackend::new().allocate(3).unwrap();
        value.as_mut().copy_from_slice(b"abc");
        let data = Data {
            key: Box::from(&b"k"[..]),
            value,
            hash: 42,
            charge: 1,
        };
        Record::new(data, callback)
    }

    #[test]
    fn test_record_flags() {
        let r = record(None);
        assert!(!r.is_in_cache());
        assert!(!r.is_in_eviction());

        r.set_in_cache(true);
        r.set_in_eviction(true);
        assert!(r.is_in_cache());
        assert!(r.is_in_eviction());

        r.set_in_eviction(false);
        assert!(r.is_in_cache());
        assert!(!r.is_in_eviction());
    }

    #[test]
    fn test_record_refs() {
        let r = record(None);
        assert_eq!(r.inc_refs(2), 2);
        assert_eq!(r.dec_refs(1), 1);
        assert_eq!(r.refs(), 1);
    }

    #[test]
    fn test_record_notify() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let r = record(Some(Arc::new(move |key: &[u8], value: &[u8]| {
            assert_eq!(key, b"k");
            assert_eq!(value, b"abc");
            c.fetch_add(1, Ordering::Relaxed);
        })));
        r.notify();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
