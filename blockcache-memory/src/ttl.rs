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

//! A FIFO cache of typed values with a static time-to-live.
//!
//! Expired entries are not returned by [`TtlCache::get`] but stay in the cache until FIFO eviction pushes them out.
//! Values live in a side store; the cache entry only holds the slot index and the expiry timestamp.

use std::{
    fmt::Debug,
    marker::PhantomData,
    ops::Deref,
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use blockcache_common::{
    hasher::XxHash64Builder,
    slab::{Slab, Token},
    strict_assert,
};
use parking_lot::Mutex;

use crate::{
    backend::VolatileBackend,
    cache::ShardCount,
    error::{Error, Result},
    eviction::EvictionPolicy,
    metrics::CacheMetrics,
    raw::{CacheBehavior, Charge, RawCache, RawCacheConfig, RawCacheEntry},
    record::EvictionCallback,
};

/// Slot index and expiry, stored as the value bytes of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    index: u64,
    /// Nanoseconds since the cache epoch.
    expire: u64,
}

impl Stamp {
    const SIZE: usize = 16;

    fn write(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.index.to_le_bytes());
        buf[8..Self::SIZE].copy_from_slice(&self.expire.to_le_bytes());
    }

    fn read(buf: &[u8]) -> Self {
        strict_assert!(buf.len() >= Self::SIZE);
        let mut index = [0; 8];
        let mut expire = [0; 8];
        index.copy_from_slice(&buf[..8]);
        expire.copy_from_slice(&buf[8..Self::SIZE]);
        Self {
            index: u64::from_le_bytes(index),
            expire: u64::from_le_bytes(expire),
        }
    }

    fn token(&self) -> Token {
        Token::from_index(self.index as usize)
    }
}

struct TtlShared<V> {
    epoch: Instant,
    values: Mutex<Slab<Arc<V>>>,
    metrics: ArcSwap<CacheMetrics>,
}

impl<V> TtlShared<V> {
    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn is_expired(&self, stamp: &Stamp) -> bool {
        self.now() >= stamp.expire
    }
}

impl<V> EvictionCallback for TtlShared<V>
where
    V: Send + Sync + 'static,
{
    fn on_evict(&self, key: &[u8], value: &[u8]) {
        let stamp = Stamp::read(value);
        if self.is_expired(&stamp) {
            self.metrics.load().evict_expired.increase(1);
        }
        let value = self.values.lock().remove(stamp.token());
        strict_assert!(value.is_some());
        tracing::trace!("[ttl]: release value of key {:?} at slot {}", key, stamp.index);
        // The value is dropped here, out of the side store lock.
        drop(value);
    }
}

/// Builder of a [`TtlCache`].
pub struct TtlCacheBuilder<V> {
    name: String,
    capacity: usize,
    ttl: Duration,
    shards: ShardCount,
    metrics: Option<Arc<CacheMetrics>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> TtlCacheBuilder<V>
where
    V: Send + Sync + 'static,
{
    /// Start building a TTL cache with the given capacity and entry time-to-live.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            name: "blockcache-ttl".to_string(),
            capacity,
            ttl,
            shards: ShardCount::Auto,
            metrics: None,
            _marker: PhantomData,
        }
    }

    /// Set the cache name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the shard count.
    pub fn with_shards(mut self, shards: ShardCount) -> Self {
        self.shards = shards;
        self
    }

    /// Set the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<TtlCache<V>> {
        let shards = self.shards.resolve();
        if shards == 0 {
            return Err(Error::config("shard count must be greater than zero"));
        }

        let metrics = self.metrics.unwrap_or_else(|| Arc::new(CacheMetrics::noop()));

        tracing::info!(
            "[ttl]: build ttl cache {} with capacity: {}, shards: {}, ttl: {:?}",
            self.name,
            self.capacity,
            shards,
            self.ttl
        );

        let cache = RawCache::new(RawCacheConfig {
            name: self.name,
            capacity: self.capacity,
            shards,
            eviction_policy: EvictionPolicy::Fifo,
            backend: VolatileBackend::new(),
            hash_builder: XxHash64Builder::default(),
            mem_tracker: None,
            memtracker_approximation_ratio: 0.0,
            metrics: metrics.clone(),
        });
        let shared = Arc::new(TtlShared {
            epoch: Instant::now(),
            values: Mutex::new(Slab::new()),
            metrics: ArcSwap::new(metrics),
        });

        Ok(TtlCache {
            cache,
            callback: shared.clone(),
            shared,
            ttl: self.ttl,
        })
    }
}

/// A cache of typed values that expire a fixed time after they are put.
///
/// Backed by a FIFO [`RawCache`]: the oldest entry is evicted first, even if a handle to it is still held.
pub struct TtlCache<V> {
    cache: RawCache<VolatileBackend>,
    shared: Arc<TtlShared<V>>,
    callback: Arc<dyn EvictionCallback>,
    ttl: Duration,
}

impl<V> Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V> TtlCache<V>
where
    V: Send + Sync + 'static,
{
    /// Put a value, replacing the entry with the same key if any.
    ///
    /// The returned entry keeps the value readable after the cache drops it.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::ttl::put"))]
    pub fn put(&self, key: &[u8], value: V, charge: impl Into<Charge>) -> Result<TtlEntry<V>> {
        let mut pending = self.cache.allocate(key, Stamp::SIZE, charge)?;

        let value = Arc::new(value);
        let token = self.shared.values.lock().insert(value.clone());
        let ttl = u64::try_from(self.ttl.as_nanos()).unwrap_or(u64::MAX);
        let stamp = Stamp {
            index: token.index() as u64,
            expire: self.shared.now().saturating_add(ttl),
        };
        stamp.write(pending.mutable_value());

        let handle = self.cache.insert(pending, Some(self.callback.clone()));
        Ok(TtlEntry { handle, value })
    }

    /// Get the value of `key` if it is cached and not expired.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::ttl::get"))]
    pub fn get(&self, key: &[u8]) -> Option<TtlEntry<V>> {
        let handle = self.cache.lookup(key, CacheBehavior::ExpectInCache)?;
        let stamp = Stamp::read(handle.value());
        if self.shared.is_expired(&stamp) {
            self.shared.metrics.load().hit_expired.increase(1);
            return None;
        }
        // The slot outlives every handle of its entry.
        let value = self.shared.values.lock().get(stamp.token()).cloned()?;
        Some(TtlEntry { handle, value })
    }

    /// Replace the metrics sink.
    pub fn set_metrics(&self, metrics: Arc<CacheMetrics>) {
        self.shared.metrics.store(metrics.clone());
        self.cache.set_metrics(metrics);
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        self.cache.name()
    }

    /// Time-to-live of new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Total capacity of the cache.
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Sum of the charges of in-cache entries, expired ones included.
    pub fn usage(&self) -> usize {
        self.cache.usage()
    }

    /// Count of entries in the cache, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// A handle to a value of a [`TtlCache`].
pub struct TtlEntry<V> {
    handle: RawCacheEntry<VolatileBackend, XxHash64Builder>,
    value: Arc<V>,
}

impl<V> Debug for TtlEntry<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlEntry")
            .field("handle", &self.handle)
            .field("value", &self.value)
            .finish()
    }
}

impl<V> Deref for TtlEntry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<V> TtlEntry<V> {
    /// Value of the entry.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Key of the entry.
    pub fn key(&self) -> &[u8] {
        self.handle.key()
    }

    /// Whether the entry was removed from the cache after this handle was taken.
    pub fn is_outdated(&self) -> bool {
        self.handle.is_outdated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingMetricsRegistry;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<TtlCache<String>>();
        is_send_sync_static::<TtlEntry<String>>();
    }

    #[test]
    fn test_stamp() {
        let stamp = Stamp {
            index: 42,
            expire: u64::MAX - 1,
        };
        let mut buf = [0; Stamp::SIZE];
        stamp.write(&mut buf);
        assert_eq!(Stamp::read(&buf), stamp);
        assert_eq!(stamp.token().index(), 42);
    }

    struct Harness {
        registry: RecordingMetricsRegistry,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: RecordingMetricsRegistry::default(),
            }
        }

        fn cache(&self, capacity: usize, ttl: Duration) -> TtlCache<i32> {
            TtlCacheBuilder::new(capacity, ttl)
                .with_name("ttl")
                .with_shards(ShardCount::ForceSingleShard)
                .with_metrics(Arc::new(CacheMetrics::new("ttl", &self.registry)))
                .build()
                .unwrap()
        }

        fn op(&self, op: &str) -> u64 {
            self.registry.counter("blockcache_memory_op_total", &["ttl", op])
        }

        fn usage(&self) -> i64 {
            self.registry.gauge("blockcache_memory_usage", &["ttl"])
        }
    }

    #[test_log::test]
    fn test_no_expiration() {
        let h = Harness::new();
        let cache = h.cache(1, Duration::from_secs(300));

        assert!(cache.get(b"key0").is_none());
        assert_eq!(h.op("hit"), 0);
        assert_eq!(h.op("lookup"), 1);
        assert_eq!(h.op("miss"), 1);
        assert_eq!(h.usage(), 0);

        {
            let put = cache.put(b"key0", 0, 1).unwrap();
            assert_eq!(*put, 0);

            {
                let get = cache.get(b"key0").unwrap();
                assert_eq!(*get, 0);
                assert_eq!(h.op("lookup"), 2);
                assert_eq!(h.op("hit"), 1);
                assert!(std::ptr::eq(put.value(), get.value()));
            }

            // The cache is full: the pinned entry leaves it but stays alive.
            let put1 = cache.put(b"key1", 1, 1).unwrap();
            assert_eq!(h.op("evict"), 0);
            assert_eq!(*put1, 1);
            assert!(put.is_outdated());
            assert!(cache.get(b"key0").is_none());
            assert_eq!(h.op("miss"), 2);
            assert_eq!(h.op("hit"), 1);

            assert_eq!(*put, 0);
            assert_eq!(h.usage(), 2);
        }
        assert_eq!(h.op("evict"), 1);
        assert_eq!(h.usage(), 1);

        {
            let put = cache.put(b"k", 5, 1).unwrap();
            assert_eq!(h.op("insert"), 3);
            assert_eq!(h.op("evict"), 2);
            assert_eq!(h.usage(), 1);

            let get0 = cache.get(b"k").unwrap();
            let get1 = cache.get(b"k").unwrap();
            assert!(std::ptr::eq(put.value(), get0.value()));
            assert!(std::ptr::eq(get0.value(), get1.value()));
            assert_eq!(*get1, 5);
        }

        assert_eq!(h.op("hit_expired"), 0);
        assert_eq!(h.op("evict_expired"), 0);
        assert_eq!(h.op("evict"), 2);
        assert_eq!(h.usage(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test_log::test]
    fn test_expiration() {
        const CAPACITY: usize = 5;
        let ttl = Duration::from_millis(100);
        let pause = || std::thread::sleep(ttl + Duration::from_millis(10));
        let key = |prefix: &str, i: usize| format!("{prefix}{i}").into_bytes();

        let h = Harness::new();
        let cache = h.cache(CAPACITY, ttl);

        for op in ["evict", "evict_expired", "hit", "hit_expired", "insert", "lookup", "miss"] {
            assert_eq!(h.op(op), 0);
        }
        assert_eq!(h.usage(), 0);

        let put = cache.put(b"key0", 100, 1).unwrap();
        assert_eq!(h.op("insert"), 1);
        assert_eq!(h.usage(), 1);
        assert_eq!(*put, 100);
        assert_eq!(h.op("lookup"), 0);

        pause();
        // An expired entry is a hit of the underlying cache, but it is not returned.
        assert!(cache.get(b"key0").is_none());
        assert_eq!(h.op("lookup"), 1);
        assert_eq!(h.op("miss"), 0);
        assert_eq!(h.op("hit"), 1);
        assert_eq!(h.op("hit_expired"), 1);
        assert_eq!(h.op("evict_expired"), 0);
        assert_eq!(*put, 100);

        {
            let replaced = cache.put(b"key0", 200, 1).unwrap();
            assert_eq!(*replaced, 200);
            assert_eq!(h.op("insert"), 2);
            assert_eq!(h.usage(), 2);
            assert_eq!(*put, 100);
        }

        for i in 0..CAPACITY {
            drop(cache.put(&key("1key", i), i as i32, 1).unwrap());
            assert_eq!(*cache.get(&key("1key", i)).unwrap(), i as i32);
        }
        assert_eq!(h.op("insert"), CAPACITY as u64 + 2);
        assert_eq!(h.op("lookup"), CAPACITY as u64 + 1);
        assert_eq!(h.op("hit"), CAPACITY as u64 + 1);
        assert_eq!(h.op("miss"), 0);
        // The replacement of `key0` was pushed out; nothing referenced it.
        assert_eq!(h.op("evict"), 1);
        assert_eq!(h.op("evict_expired"), 0);
        assert_eq!(h.usage(), CAPACITY as i64 + 1);

        assert!(cache.get(b"key0").is_none());
        assert_eq!(h.op("miss"), 1);

        for i in 0..CAPACITY {
            assert_eq!(*cache.get(&key("1key", i)).unwrap(), i as i32);
        }
        assert_eq!(h.op("lookup"), CAPACITY as u64 * 2 + 2);
        assert_eq!(h.op("miss"), 1);

        pause();
        for i in 0..CAPACITY + 1 {
            assert!(cache.get(&key("1key", i)).is_none());
        }
        assert_eq!(h.op("hit_expired"), CAPACITY as u64 + 1);
        // Expired entries are only dropped by eviction.
        assert_eq!(h.op("evict_expired"), 0);
        assert_eq!(h.op("miss"), 2);
        assert_eq!(cache.len(), CAPACITY);

        for i in 0..2 * CAPACITY {
            drop(cache.put(&key("2key", i), i as i32, 1).unwrap());
        }
        assert_eq!(h.op("evict"), CAPACITY as u64 * 2 + 1);
        assert_eq!(h.op("evict_expired"), CAPACITY as u64);
        assert_eq!(h.usage(), CAPACITY as i64 + 1);

        for i in 0..CAPACITY {
            assert!(cache.get(&key("2key", i)).is_none());
        }
        assert_eq!(h.op("miss"), CAPACITY as u64 + 2);
        assert_eq!(h.op("hit_expired"), CAPACITY as u64 + 1);

        for i in CAPACITY..2 * CAPACITY {
            assert_eq!(*cache.get(&key("2key", i)).unwrap(), i as i32);
        }
        assert_eq!(h.op("miss"), CAPACITY as u64 + 2);

        assert_eq!(*put, 100);
        assert_eq!(h.usage(), CAPACITY as i64 + 1);

        // The first value is only released with its last handle, after it expired.
        drop(put);
        assert_eq!(h.op("evict_expired"), CAPACITY as u64 + 1);
        assert_eq!(h.usage(), CAPACITY as i64);
    }

    #[test_log::test]
    fn test_values_dropped() {
        let values = Arc::new(());
        let cache = TtlCacheBuilder::new(2, Duration::from_secs(60))
            .with_shards(ShardCount::Fixed(2))
            .build()
            .unwrap();

        for i in 0..16u32 {
            drop(cache.put(&i.to_le_bytes(), values.clone(), 1).unwrap());
        }
        // At most one entry per shard is left.
        assert!(Arc::strong_count(&values) <= 3);
        assert_eq!(Arc::strong_count(&values), 1 + cache.len());

        let pinned = cache.put(b"pinned", values.clone(), 1).unwrap();
        drop(cache);
        // The handle keeps the cache alive.
        assert!(Arc::strong_count(&values) >= 2);
        drop(pinned);
        assert_eq!(Arc::strong_count(&values), 1);
    }

    #[test]
    fn test_build_rejects_zero_shards() {
        let res = TtlCacheBuilder::<i32>::new(16, Duration::from_secs(1))
            .with_shards(ShardCount::Fixed(0))
            .build();
        assert!(matches!(res, Err(Error::ConfigError(_))));
    }
}
