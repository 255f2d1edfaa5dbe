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
    hash::BuildHasher,
    ops::Deref,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use blockcache_common::{
    hasher::{HashBuilder, XxHash64Builder},
    mem_tracker::MemTracker,
    strict_assert,
};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    backend::{AllocError, MemoryBackend, MemoryType},
    error::{Error, Result},
    eviction::EvictionPolicy,
    metrics::CacheMetrics,
    record::{Data, EvictionCallback, Record},
    shard::{Garbages, RawCacheShard},
};

/// Cost of an entry against the cache capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// A caller-chosen cost.
    Fixed(usize),
    /// The memory footprint of the entry: key, value storage reserved by the backend and bookkeeping.
    Automatic,
}

impl From<usize> for Charge {
    fn from(charge: usize) -> Self {
        Self::Fixed(charge)
    }
}

/// Largest charge of a single entry. Charges are reported to [`MemTracker`] as signed deltas.
pub const MAX_CHARGE: usize = i64::MAX as usize;

/// Whether a lookup expects the key to be cached.
///
/// Only affects which metrics are updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheBehavior {
    /// The caller would cache the entry after a miss.
    #[default]
    ExpectInCache,
    /// The caller only checks whether the key is cached.
    NoExpectInCache,
}

/// Config of a [`RawCache`].
pub struct RawCacheConfig<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    /// Name of the cache, used in logs and metrics.
    pub name: String,
    /// Capacity of the cache, split across shards.
    pub capacity: usize,
    /// Count of shards. Must be greater than zero.
    pub shards: usize,
    /// Eviction policy of every shard.
    pub eviction_policy: EvictionPolicy,
    /// Storage for entry values.
    pub backend: B,
    /// Hasher for keys. The hash picks the shard.
    pub hash_builder: S,
    /// Tracker that receives the charges of live entries.
    pub mem_tracker: Option<Arc<MemTracker>>,
    /// Fraction of a shard's capacity the tracker may lag behind.
    pub memtracker_approximation_ratio: f64,
    /// Metrics sink.
    pub metrics: Arc<CacheMetrics>,
}

/// Batches the consumption reports of one shard to a [`MemTracker`].
///
/// Deltas accumulate until their absolute sum exceeds the threshold, so the tracker drifts from the exact value by
/// at most the threshold per shard.
#[derive(Debug)]
struct DeferredTracker {
    tracker: Arc<MemTracker>,
    pending: AtomicI64,
    threshold: i64,
}

impl DeferredTracker {
    fn update(&self, delta: i64) {
        let pending = self.pending.fetch_add(delta, Ordering::AcqRel).saturating_add(delta);
        if pending.abs() > self.threshold {
            self.flush();
        }
    }

    fn flush(&self) {
        let pending = self.pending.swap(0, Ordering::AcqRel);
        if pending != 0 {
            self.tracker.consume(pending);
        }
    }
}

struct RawCacheInner<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    name: String,
    shards: Vec<Mutex<RawCacheShard<B>>>,
    trackers: Vec<DeferredTracker>,
    mem_tracker: Option<Arc<MemTracker>>,

    capacity: usize,
    eviction_policy: EvictionPolicy,
    /// Sum of the charges of records not reclaimed yet, cached or not.
    live: AtomicUsize,

    backend: B,
    hash_builder: S,

    metrics: ArcSwap<CacheMetrics>,
}

impl<B, S> RawCacheInner<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn shard(&self, hash: u64) -> usize {
        hash as usize % self.shards.len()
    }

    fn account(&self, shard: usize, delta: i64) {
        if let Some(tracker) = self.trackers.get(shard) {
            tracker.update(delta);
        }
    }

    /// Tear down a record whose last reference is gone.
    ///
    /// Must be called without any shard lock held. The storage is returned to the backend when the caller drops its
    /// `Arc`.
    fn reclaim(&self, record: &Record<B>) {
        strict_assert!(!record.is_in_cache());
        strict_assert!(!record.is_in_eviction());

        record.notify();

        let charge = record.charge();
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| Some(live.saturating_sub(charge)));
        let metrics = self.metrics.load();
        metrics.evict.increase(1);
        metrics.usage.decrease(charge as u64);
        self.account(self.shard(record.hash()), -(charge as i64));
    }

    /// Lock shard `index`, run `f` on it, then reclaim what `f` dropped.
    fn with_shard<F, R>(&self, index: usize, f: F) -> R
    where
        F: FnOnce(&mut RawCacheShard<B>, &mut Garbages<B>) -> R,
    {
        let mut garbages = vec![];
        let res = f(&mut self.shards[index].lock(), &mut garbages);

        // Reclaim out of the lock critical section, callbacks may call into the cache.
        for (event, record) in garbages {
            tracing::trace!(
                "[raw]: reclaim record (hash: {}) charge: {} on {:?}",
                record.hash(),
                record.charge(),
                event
            );
            self.reclaim(&record);
        }
        res
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::inner::clear"))]
    fn clear(&self) {
        for index in 0..self.shards.len() {
            self.with_shard(index, |shard, garbages| shard.clear(garbages));
        }
    }

    /// Evict the oldest entry of one shard, trying shards round robin from `start`. Returns `false` if every order
    /// list is empty.
    fn evict_any(&self, start: usize) -> bool {
        let shards = self.shards.len();
        (0..shards).any(|i| {
            self.with_shard((start + i) % shards, |shard, garbages| {
                shard.evict_oldest(garbages).is_some()
            })
        })
    }

    fn insert(self: &Arc<Self>, data: Data<B>, callback: Option<Arc<dyn EvictionCallback>>) -> RawCacheEntry<B, S> {
        let record = Arc::new(Record::new(data, callback));
        let index = self.shard(record.hash());

        let _ = self.live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
            Some(live.saturating_add(record.charge()))
        });
        let metrics = self.metrics.load();
        metrics.insert.increase(1);
        metrics.usage.increase(record.charge() as u64);
        self.account(index, record.charge() as i64);

        self.with_shard(index, |shard, garbages| shard.insert(record.clone(), garbages));

        RawCacheEntry {
            inner: self.clone(),
            record,
        }
    }
}

impl<B, S> Drop for RawCacheInner<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn drop(&mut self) {
        self.clear();
        self.trackers.iter().for_each(|tracker| tracker.flush());
    }
}

/// The sharded, handle-based cache generic over its memory backend.
pub struct RawCache<B, S = XxHash64Builder>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<B, S>>,
}

impl<B, S> Clone for RawCache<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B, S> Debug for RawCache<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("shards", &self.inner.shards.len())
            .field("eviction_policy", &self.inner.eviction_policy)
            .field("backend", &self.inner.backend)
            .finish()
    }
}

impl<B, S> RawCache<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    /// Create a cache.
    ///
    /// # Panics
    ///
    /// Panics if `config.shards` is zero.
    pub fn new(config: RawCacheConfig<B, S>) -> Self {
        assert!(config.shards > 0, "shards must be greater than zero.");

        let shard_capacities = (0..config.shards)
            .map(|index| Self::shard_capacity_for(config.capacity, config.shards, index))
            .collect_vec();

        let trackers = match config.mem_tracker.as_ref() {
            Some(tracker) => shard_capacities
                .iter()
                .map(|&capacity| DeferredTracker {
                    tracker: tracker.clone(),
                    pending: AtomicI64::new(0),
                    threshold: (capacity as f64 * config.memtracker_approximation_ratio) as i64,
                })
                .collect_vec(),
            None => vec![],
        };

        let shards = shard_capacities
            .into_iter()
            .map(|capacity| RawCacheShard::new(capacity, config.eviction_policy))
            .map(Mutex::new)
            .collect_vec();

        config.metrics.usage.absolute(0);

        let inner = RawCacheInner {
            name: config.name,
            shards,
            trackers,
            mem_tracker: config.mem_tracker,
            capacity: config.capacity,
            eviction_policy: config.eviction_policy,
            live: AtomicUsize::new(0),
            backend: config.backend,
            hash_builder: config.hash_builder,
            metrics: ArcSwap::new(config.metrics),
        };

        Self { inner: Arc::new(inner) }
    }

    fn shard_capacity_for(total: usize, shards: usize, index: usize) -> usize {
        let base = total / shards;
        let remainder = total % shards;
        base + usize::from(index < remainder)
    }

    /// Reserve backend storage for an entry without publishing it.
    ///
    /// If the backend is out of space, entries are evicted from the order lists until the allocation succeeds or
    /// nothing is left to evict. Charges above [`MAX_CHARGE`] are refused before any storage is reserved.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::allocate"))]
    pub fn allocate(&self, key: &[u8], value_len: usize, charge: impl Into<Charge>) -> Result<RawPendingEntry<B, S>> {
        let charge = charge.into();
        if let Charge::Fixed(charge) = charge {
            Self::check_charge(charge)?;
        }

        let hash = self.inner.hash_builder.hash_one(key);
        let start = self.inner.shard(hash);

        let value = loop {
            match self.inner.backend.allocate(value_len) {
                Ok(buffer) => break buffer,
                Err(AllocError::OutOfSpace) if self.inner.evict_any(start) => continue,
                Err(source) => {
                    tracing::warn!(
                        "[raw]: cache {} cannot allocate {} bytes from {} memory: {}",
                        self.inner.name,
                        value_len,
                        self.inner.backend.memory_type(),
                        source
                    );
                    return Err(Error::AllocationFailed { len: value_len, source });
                }
            }
        };

        let charge = match charge {
            Charge::Fixed(charge) => charge,
            Charge::Automatic => {
                let charge = key
                    .len()
                    .saturating_add(self.inner.backend.usable_size(&value))
                    .saturating_add(std::mem::size_of::<Record<B>>());
                if let Err(e) = Self::check_charge(charge) {
                    self.inner.backend.deallocate(value);
                    return Err(e);
                }
                charge
            }
        };

        Ok(RawPendingEntry {
            inner: self.inner.clone(),
            data: Some(Data {
                key: key.into(),
                value,
                hash,
                charge,
            }),
        })
    }

    fn check_charge(charge: usize) -> Result<()> {
        if charge > MAX_CHARGE {
            return Err(Error::ChargeTooLarge {
                charge,
                limit: MAX_CHARGE,
            });
        }
        Ok(())
    }

    /// Publish a pending entry, replacing any entry with the same key.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::insert"))]
    pub fn insert(
        &self,
        pending: RawPendingEntry<B, S>,
        callback: Option<Arc<dyn EvictionCallback>>,
    ) -> RawCacheEntry<B, S> {
        strict_assert!(pending.is_allocated_by(self));
        pending.insert(callback)
    }

    /// Take a handle of the entry with the given key, if it is in the cache.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::lookup"))]
    pub fn lookup(&self, key: &[u8], behavior: CacheBehavior) -> Option<RawCacheEntry<B, S>> {
        let hash = self.inner.hash_builder.hash_one(key);
        let record = self.inner.shards[self.inner.shard(hash)].lock().lookup(hash, key);

        let metrics = self.inner.metrics.load();
        let caching = behavior == CacheBehavior::ExpectInCache;
        metrics.lookup.increase(1);
        match record.is_some() {
            true => {
                metrics.hit.increase(1);
                if caching {
                    metrics.hit_caching.increase(1);
                }
            }
            false => {
                metrics.miss.increase(1);
                if caching {
                    metrics.miss_caching.increase(1);
                }
            }
        }

        record.map(|record| RawCacheEntry {
            inner: self.inner.clone(),
            record,
        })
    }

    /// Remove the entry with the given key from the cache.
    ///
    /// Its storage is reclaimed once the last handle is released.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::erase"))]
    pub fn erase(&self, key: &[u8]) {
        let hash = self.inner.hash_builder.hash_one(key);
        self.inner
            .with_shard(self.inner.shard(hash), |shard, garbages| shard.erase(hash, key, garbages));
    }

    /// Whether an entry with the given key is in the cache. Does not count as a lookup or affect eviction order.
    pub fn contains(&self, key: &[u8]) -> bool {
        let hash = self.inner.hash_builder.hash_one(key);
        self.inner.shards[self.inner.shard(hash)].lock().contains(hash, key)
    }

    /// Remove every entry from the cache.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Replace the metrics sink.
    ///
    /// The usage gauge of the new sink is set to the charges of all entries not reclaimed yet.
    pub fn set_metrics(&self, metrics: Arc<CacheMetrics>) {
        metrics.usage.absolute(self.inner.live.load(Ordering::Acquire) as u64);
        self.inner.metrics.store(metrics);
    }

    /// Current metrics sink.
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.inner.metrics.load_full()
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total capacity of the cache.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Sum of the charges of in-cache entries.
    pub fn usage(&self) -> usize {
        self.inner
            .shards
            .iter()
            .fold(0, |usage, shard| usage.saturating_add(shard.lock().usage()))
    }

    /// Count of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of shards.
    pub fn shards(&self) -> usize {
        self.inner.shards.len()
    }

    /// Usage of each shard.
    pub fn shard_usages(&self) -> Vec<usize> {
        self.inner.shards.iter().map(|shard| shard.lock().usage()).collect()
    }

    /// Capacity of each shard.
    pub fn shard_capacities(&self) -> Vec<usize> {
        self.inner.shards.iter().map(|shard| shard.lock().capacity()).collect()
    }

    /// Eviction policy of the shards.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.inner.eviction_policy
    }

    /// Kind of memory that holds entry values.
    pub fn memory_type(&self) -> MemoryType {
        self.inner.backend.memory_type()
    }

    /// Memory backend of the cache.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Key hasher of the cache.
    pub fn hash_builder(&self) -> &S {
        &self.inner.hash_builder
    }

    /// Tracker that receives the charges of live entries.
    pub fn mem_tracker(&self) -> Option<&Arc<MemTracker>> {
        self.inner.mem_tracker.as_ref()
    }
}

/// An allocated entry that is not visible in the cache yet.
///
/// Dropping it returns the storage to the backend.
pub struct RawPendingEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<B, S>>,
    data: Option<Data<B>>,
}

impl<B, S> Debug for RawPendingEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPendingEntry")
            .field("hash", &self.data().hash)
            .field("charge", &self.data().charge)
            .finish()
    }
}

impl<B, S> RawPendingEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn data(&self) -> &Data<B> {
        match self.data.as_ref() {
            Some(data) => data,
            None => unreachable!("pending entry data is only taken on insert or drop"),
        }
    }

    /// Key of the entry.
    pub fn key(&self) -> &[u8] {
        &self.data().key
    }

    /// Charge of the entry.
    pub fn charge(&self) -> usize {
        self.data().charge
    }

    /// Value of the entry.
    pub fn value(&self) -> &[u8] {
        self.data().value.as_ref()
    }

    /// Writable view of the value storage. Only available before publication.
    pub fn mutable_value(&mut self) -> &mut [u8] {
        match self.data.as_mut() {
            Some(data) => data.value.as_mut(),
            None => unreachable!("pending entry data is only taken on insert or drop"),
        }
    }

    /// Whether the entry was allocated by `cache`.
    pub fn is_allocated_by(&self, cache: &RawCache<B, S>) -> bool {
        Arc::ptr_eq(&self.inner, &cache.inner)
    }

    /// Publish the entry into the cache that allocated it.
    pub fn insert(mut self, callback: Option<Arc<dyn EvictionCallback>>) -> RawCacheEntry<B, S> {
        match self.data.take() {
            Some(data) => self.inner.insert(data, callback),
            None => unreachable!("pending entry data is only taken on insert or drop"),
        }
    }
}

impl<B, S> Drop for RawPendingEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.inner.backend.deallocate(data.value);
        }
    }
}

/// A counted reference to a cache entry.
///
/// The value stays readable for the lifetime of the handle, even after the entry left the cache. Dropping the
/// handle releases the reference.
pub struct RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    inner: Arc<RawCacheInner<B, S>>,
    record: Arc<Record<B>>,
}

impl<B, S> Debug for RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCacheEntry").field("record", &self.record).finish()
    }
}

impl<B, S> Drop for RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn drop(&mut self) {
        let index = self.inner.shard(self.record.hash());
        let last = self.inner.shards[index].lock().release(&self.record);
        if last {
            self.inner.reclaim(&self.record);
        }
    }
}

impl<B, S> Clone for RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        // The handle being cloned keeps the record off the LRU list, so no shard lock is needed.
        self.record.inc_refs(1);
        Self {
            inner: self.inner.clone(),
            record: self.record.clone(),
        }
    }
}

impl<B, S> Deref for RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<B, S> RawCacheEntry<B, S>
where
    B: MemoryBackend,
    S: HashBuilder,
{
    /// Hash of the key.
    pub fn hash(&self) -> u64 {
        self.record.hash()
    }

    /// Key of the entry.
    pub fn key(&self) -> &[u8] {
        self.record.key()
    }

    /// Value of the entry.
    pub fn value(&self) -> &[u8] {
        self.record.value()
    }

    /// Charge of the entry.
    pub fn charge(&self) -> usize {
        self.record.charge()
    }

    /// Reference count of the entry, including the cache's own reference while it is cached.
    pub fn refs(&self) -> usize {
        self.record.refs()
    }

    /// Whether the entry was removed from the cache after this handle was taken.
    pub fn is_outdated(&self) -> bool {
        !self.record.is_in_cache()
    }
}
