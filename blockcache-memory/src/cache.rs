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

use std::{fmt::Debug, ops::Deref, path::PathBuf, sync::Arc};

use blockcache_common::{
    hasher::{HashBuilder, XxHash64Builder},
    mem_tracker::MemTracker,
    strict_assert,
};
use serde::{Deserialize, Serialize};

#[cfg(unix)]
use crate::backend::PersistentBackend;
use crate::{
    backend::{MemoryType, VolatileBackend},
    error::{Error, Result},
    eviction::EvictionPolicy,
    metrics::CacheMetrics,
    raw::{CacheBehavior, Charge, RawCache, RawCacheConfig, RawCacheEntry, RawPendingEntry},
    record::EvictionCallback,
};

/// Largest shard count picked by [`ShardCount::Auto`].
pub const MAX_AUTO_SHARDS: usize = 64;

/// How many shards a cache is split into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardCount {
    /// The available parallelism rounded up to a power of two, at most [`MAX_AUTO_SHARDS`].
    #[default]
    Auto,
    /// A single shard, which makes eviction order global.
    ForceSingleShard,
    /// An explicit shard count.
    Fixed(usize),
}

impl ShardCount {
    /// Resolve the shard count on the current machine.
    pub fn resolve(self) -> usize {
        match self {
            ShardCount::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .next_power_of_two()
                .min(MAX_AUTO_SHARDS),
            ShardCount::ForceSingleShard => 1,
            ShardCount::Fixed(shards) => shards,
        }
    }
}

/// Serializable configuration of a [`Cache`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the cache, used in logs, metrics and the memory tracker id.
    pub name: String,
    /// Capacity in charge units, usually bytes.
    pub capacity: usize,
    /// Shard count.
    pub shards: ShardCount,
    /// Memory that holds entry values.
    pub memory_type: MemoryType,
    /// Eviction policy of every shard.
    pub eviction_policy: EvictionPolicy,
    /// Fraction of a shard's capacity the memory tracker may lag behind. Must be in `[0, 1)`.
    pub memtracker_approximation_ratio: f64,
    /// Directory that holds the persistent memory pool file.
    pub nvm_cache_path: Option<PathBuf>,
    /// Largest single value accepted by the volatile backend.
    pub max_allocation: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "blockcache".to_string(),
            capacity: 512 * 1024 * 1024,
            shards: ShardCount::Auto,
            memory_type: MemoryType::Volatile,
            eviction_policy: EvictionPolicy::Lru,
            memtracker_approximation_ratio: 0.01,
            nvm_cache_path: None,
            max_allocation: None,
        }
    }
}

/// Builder of a [`Cache`].
pub struct CacheBuilder<S = XxHash64Builder>
where
    S: HashBuilder,
{
    config: CacheConfig,
    hash_builder: S,
    parent_mem_tracker: Option<Arc<MemTracker>>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl CacheBuilder<XxHash64Builder> {
    /// Start building a volatile LRU cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self::from_config(CacheConfig {
            capacity,
            ..Default::default()
        })
    }

    /// Start building a cache from a loaded configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            hash_builder: XxHash64Builder::default(),
            parent_mem_tracker: None,
            metrics: None,
        }
    }
}

impl<S> CacheBuilder<S>
where
    S: HashBuilder,
{
    /// Set the cache name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the shard count. Entries are distributed to shards by the hash of their key.
    pub fn with_shards(mut self, shards: ShardCount) -> Self {
        self.config.shards = shards;
        self
    }

    /// Set the memory type of entry values.
    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.config.memory_type = memory_type;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction_policy(mut self, eviction_policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = eviction_policy;
        self
    }

    /// Set how far the memory tracker may lag behind, as a fraction of a shard's capacity.
    ///
    /// 0 reports every change.
    pub fn with_memtracker_approximation_ratio(mut self, ratio: f64) -> Self {
        self.config.memtracker_approximation_ratio = ratio;
        self
    }

    /// Set the directory of the persistent memory pool.
    pub fn with_nvm_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.nvm_cache_path = Some(path.into());
        self
    }

    /// Refuse volatile allocations larger than `limit` bytes.
    pub fn with_max_allocation(mut self, limit: usize) -> Self {
        self.config.max_allocation = Some(limit);
        self
    }

    /// Set the tracker the cache's own memory tracker reports to.
    pub fn with_parent_mem_tracker(mut self, parent: Arc<MemTracker>) -> Self {
        self.parent_mem_tracker = Some(parent);
        self
    }

    /// Set the metrics sink. Metrics are discarded by default.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the key hasher.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<OS>
    where
        OS: HashBuilder,
    {
        CacheBuilder {
            config: self.config,
            hash_builder,
            parent_mem_tracker: self.parent_mem_tracker,
            metrics: self.metrics,
        }
    }

    fn validate(&self) -> Result<()> {
        let mut errs = vec![];

        let ratio = self.config.memtracker_approximation_ratio;
        if !(0.0..1.0).contains(&ratio) {
            errs.push(Error::config(format!(
                "memtracker approximation ratio must be in [0, 1), given: {ratio}"
            )));
        }
        if self.config.shards == ShardCount::Fixed(0) {
            errs.push(Error::config("shard count must be greater than zero"));
        }
        if self.config.memory_type == MemoryType::Persistent && self.config.nvm_cache_path.is_none() {
            errs.push(Error::config("persistent memory cache requires a pool directory"));
        }

        match errs.is_empty() {
            true => Ok(()),
            false => Err(Error::multiple(errs)),
        }
    }

    /// Build the cache.
    pub fn build(self) -> Result<Cache<S>> {
        self.validate()?;

        let config = self.config;
        let shards = config.shards.resolve();
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(CacheMetrics::noop()));

        tracing::info!(
            "[cache]: build cache {} with capacity: {}, shards: {}, memory type: {}, eviction policy: {:?}",
            config.name,
            config.capacity,
            shards,
            config.memory_type,
            config.eviction_policy
        );

        let cache = match config.memory_type {
            MemoryType::Volatile => {
                let id = format!("{}-sharded_lru_cache", config.name);
                let mem_tracker = match self.parent_mem_tracker.as_ref() {
                    Some(parent) => MemTracker::new_child(id, parent),
                    None => MemTracker::new_root(id),
                };
                let backend = match config.max_allocation {
                    Some(limit) => VolatileBackend::new().with_max_allocation(limit),
                    None => VolatileBackend::new(),
                };
                Cache::Volatile(RawCache::new(RawCacheConfig {
                    name: config.name,
                    capacity: config.capacity,
                    shards,
                    eviction_policy: config.eviction_policy,
                    backend,
                    hash_builder: self.hash_builder,
                    mem_tracker: Some(mem_tracker),
                    memtracker_approximation_ratio: config.memtracker_approximation_ratio,
                    metrics,
                }))
            }
            #[cfg(unix)]
            MemoryType::Persistent => {
                let dir = config
                    .nvm_cache_path
                    .ok_or_else(|| Error::config("persistent memory cache requires a pool directory"))?;
                let backend = PersistentBackend::open(&dir, config.capacity)?;
                Cache::Persistent(RawCache::new(RawCacheConfig {
                    name: config.name,
                    capacity: config.capacity,
                    shards,
                    eviction_policy: config.eviction_policy,
                    backend,
                    hash_builder: self.hash_builder,
                    mem_tracker: None,
                    memtracker_approximation_ratio: config.memtracker_approximation_ratio,
                    metrics,
                }))
            }
            #[cfg(not(unix))]
            MemoryType::Persistent => {
                return Err(Error::config("persistent memory cache is not supported on this platform"));
            }
        };

        Ok(cache)
    }
}

/// A sharded block cache over one of the supported memory backends.
pub enum Cache<S = XxHash64Builder>
where
    S: HashBuilder,
{
    /// Values on the process heap.
    Volatile(RawCache<VolatileBackend, S>),
    /// Values in a persistent memory pool.
    #[cfg(unix)]
    Persistent(RawCache<PersistentBackend, S>),
}

impl<S> Debug for Cache<S>
where
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatile(cache) => f.debug_tuple("Cache::Volatile").field(cache).finish(),
            #[cfg(unix)]
            Self::Persistent(cache) => f.debug_tuple("Cache::Persistent").field(cache).finish(),
        }
    }
}

impl<S> Clone for Cache<S>
where
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        match self {
            Self::Volatile(cache) => Self::Volatile(cache.clone()),
            #[cfg(unix)]
            Self::Persistent(cache) => Self::Persistent(cache.clone()),
        }
    }
}

impl<S> Cache<S>
where
    S: HashBuilder,
{
    /// Reserve storage for an entry of `value_len` bytes.
    ///
    /// The entry is not visible until it is inserted.
    pub fn allocate(&self, key: &[u8], value_len: usize, charge: impl Into<Charge>) -> Result<PendingEntry<S>> {
        match self {
            Cache::Volatile(cache) => cache.allocate(key, value_len, charge).map(PendingEntry::from),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.allocate(key, value_len, charge).map(PendingEntry::from),
        }
    }

    /// Publish a pending entry and return a handle of it.
    ///
    /// An entry with the same key is removed from the cache. Its existing handles stay valid.
    pub fn insert(&self, pending: PendingEntry<S>, callback: Option<Arc<dyn EvictionCallback>>) -> CacheEntry<S> {
        strict_assert!(pending.is_allocated_by(self));
        pending.insert(callback)
    }

    /// Take a handle of the entry with the given key.
    pub fn lookup(&self, key: &[u8], behavior: CacheBehavior) -> Option<CacheEntry<S>> {
        match self {
            Cache::Volatile(cache) => cache.lookup(key, behavior).map(CacheEntry::from),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.lookup(key, behavior).map(CacheEntry::from),
        }
    }

    /// Remove the entry with the given key. Absent keys are ignored.
    pub fn erase(&self, key: &[u8]) {
        match self {
            Cache::Volatile(cache) => cache.erase(key),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.erase(key),
        }
    }

    /// Whether an entry with the given key is in the cache.
    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            Cache::Volatile(cache) => cache.contains(key),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.contains(key),
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        match self {
            Cache::Volatile(cache) => cache.clear(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.clear(),
        }
    }

    /// Replace the metrics sink.
    pub fn set_metrics(&self, metrics: Arc<CacheMetrics>) {
        match self {
            Cache::Volatile(cache) => cache.set_metrics(metrics),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.set_metrics(metrics),
        }
    }

    /// Name of the cache.
    pub fn name(&self) -> &str {
        match self {
            Cache::Volatile(cache) => cache.name(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.name(),
        }
    }

    /// Capacity of the cache.
    pub fn capacity(&self) -> usize {
        match self {
            Cache::Volatile(cache) => cache.capacity(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.capacity(),
        }
    }

    /// Sum of the charges of in-cache entries.
    pub fn usage(&self) -> usize {
        match self {
            Cache::Volatile(cache) => cache.usage(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.usage(),
        }
    }

    /// Count of shards.
    pub fn shards(&self) -> usize {
        match self {
            Cache::Volatile(cache) => cache.shards(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.shards(),
        }
    }

    /// Eviction policy of the cache.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self {
            Cache::Volatile(cache) => cache.eviction_policy(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.eviction_policy(),
        }
    }

    /// Memory type of entry values.
    pub fn memory_type(&self) -> MemoryType {
        match self {
            Cache::Volatile(_) => MemoryType::Volatile,
            #[cfg(unix)]
            Cache::Persistent(_) => MemoryType::Persistent,
        }
    }

    /// Memory tracker of the cache. Persistent caches have none.
    pub fn mem_tracker(&self) -> Option<&Arc<MemTracker>> {
        match self {
            Cache::Volatile(cache) => cache.mem_tracker(),
            #[cfg(unix)]
            Cache::Persistent(cache) => cache.mem_tracker(),
        }
    }
}

/// An allocated entry of a [`Cache`] that is not published yet.
pub enum PendingEntry<S = XxHash64Builder>
where
    S: HashBuilder,
{
    /// Pending entry of a volatile cache.
    Volatile(RawPendingEntry<VolatileBackend, S>),
    /// Pending entry of a persistent cache.
    #[cfg(unix)]
    Persistent(RawPendingEntry<PersistentBackend, S>),
}

impl<S> From<RawPendingEntry<VolatileBackend, S>> for PendingEntry<S>
where
    S: HashBuilder,
{
    fn from(entry: RawPendingEntry<VolatileBackend, S>) -> Self {
        Self::Volatile(entry)
    }
}

#[cfg(unix)]
impl<S> From<RawPendingEntry<PersistentBackend, S>> for PendingEntry<S>
where
    S: HashBuilder,
{
    fn from(entry: RawPendingEntry<PersistentBackend, S>) -> Self {
        Self::Persistent(entry)
    }
}

impl<S> Debug for PendingEntry<S>
where
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatile(entry) => entry.fmt(f),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.fmt(f),
        }
    }
}

impl<S> PendingEntry<S>
where
    S: HashBuilder,
{
    /// Key of the entry.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Volatile(entry) => entry.key(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.key(),
        }
    }

    /// Charge of the entry.
    pub fn charge(&self) -> usize {
        match self {
            Self::Volatile(entry) => entry.charge(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.charge(),
        }
    }

    /// Whether the entry was allocated by `cache`.
    pub fn is_allocated_by(&self, cache: &Cache<S>) -> bool {
        match (self, cache) {
            (Self::Volatile(entry), Cache::Volatile(cache)) => entry.is_allocated_by(cache),
            #[cfg(unix)]
            (Self::Persistent(entry), Cache::Persistent(cache)) => entry.is_allocated_by(cache),
            #[cfg(unix)]
            _ => false,
        }
    }

    /// Writable view of the value storage.
    pub fn mutable_value(&mut self) -> &mut [u8] {
        match self {
            Self::Volatile(entry) => entry.mutable_value(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.mutable_value(),
        }
    }

    /// Publish the entry into the cache that allocated it.
    pub fn insert(self, callback: Option<Arc<dyn EvictionCallback>>) -> CacheEntry<S> {
        match self {
            Self::Volatile(entry) => entry.insert(callback).into(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.insert(callback).into(),
        }
    }
}

/// A handle of a [`Cache`] entry. Dropping it releases the entry.
pub enum CacheEntry<S = XxHash64Builder>
where
    S: HashBuilder,
{
    /// Entry of a volatile cache.
    Volatile(RawCacheEntry<VolatileBackend, S>),
    /// Entry of a persistent cache.
    #[cfg(unix)]
    Persistent(RawCacheEntry<PersistentBackend, S>),
}

impl<S> From<RawCacheEntry<VolatileBackend, S>> for CacheEntry<S>
where
    S: HashBuilder,
{
    fn from(entry: RawCacheEntry<VolatileBackend, S>) -> Self {
        Self::Volatile(entry)
    }
}

#[cfg(unix)]
impl<S> From<RawCacheEntry<PersistentBackend, S>> for CacheEntry<S>
where
    S: HashBuilder,
{
    fn from(entry: RawCacheEntry<PersistentBackend, S>) -> Self {
        Self::Persistent(entry)
    }
}

impl<S> Debug for CacheEntry<S>
where
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volatile(entry) => entry.fmt(f),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.fmt(f),
        }
    }
}

impl<S> Clone for CacheEntry<S>
where
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        match self {
            Self::Volatile(entry) => Self::Volatile(entry.clone()),
            #[cfg(unix)]
            Self::Persistent(entry) => Self::Persistent(entry.clone()),
        }
    }
}

impl<S> Deref for CacheEntry<S>
where
    S: HashBuilder,
{
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<S> CacheEntry<S>
where
    S: HashBuilder,
{
    /// Key of the entry.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Volatile(entry) => entry.key(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.key(),
        }
    }

    /// Value of the entry.
    pub fn value(&self) -> &[u8] {
        match self {
            Self::Volatile(entry) => entry.value(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.value(),
        }
    }

    /// Charge of the entry.
    pub fn charge(&self) -> usize {
        match self {
            Self::Volatile(entry) => entry.charge(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.charge(),
        }
    }

    /// Reference count of the entry.
    pub fn refs(&self) -> usize {
        match self {
            Self::Volatile(entry) => entry.refs(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.refs(),
        }
    }

    /// Whether the entry left the cache after this handle was taken.
    pub fn is_outdated(&self) -> bool {
        match self {
            Self::Volatile(entry) => entry.is_outdated(),
            #[cfg(unix)]
            Self::Persistent(entry) => entry.is_outdated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Cache>();
        is_send_sync_static::<CacheEntry>();
        is_send_sync_static::<PendingEntry>();
    }

    #[test]
    fn test_shard_count_resolve() {
        assert_eq!(ShardCount::ForceSingleShard.resolve(), 1);
        assert_eq!(ShardCount::Fixed(3).resolve(), 3);
        let auto = ShardCount::Auto.resolve();
        assert!(auto.is_power_of_two());
        assert!(auto <= MAX_AUTO_SHARDS);
    }

    #[test]
    fn test_config_serde() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "name": "block_cache",
                "capacity": 1048576,
                "shards": { "fixed": 4 },
                "memory_type": "persistent",
                "eviction_policy": "fifo",
                "nvm_cache_path": "/mnt/pmem"
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "block_cache");
        assert_eq!(config.shards, ShardCount::Fixed(4));
        assert_eq!(config.memory_type, MemoryType::Persistent);
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(config.memtracker_approximation_ratio, 0.01);
        assert_eq!(config.nvm_cache_path, Some(PathBuf::from("/mnt/pmem")));

        let json = serde_json::to_string(&CacheConfig::default()).unwrap();
        assert_eq!(serde_json::from_str::<CacheConfig>(&json).unwrap(), CacheConfig::default());
    }

    #[test]
    fn test_build_validation() {
        let err = CacheBuilder::new(1024)
            .with_memtracker_approximation_ratio(1.0)
            .with_shards(ShardCount::Fixed(0))
            .build()
            .unwrap_err();
        match err {
            Error::Multiple(errs) => assert_eq!(errs.errors().len(), 2),
            e => panic!("unexpected error: {e}"),
        }

        let err = CacheBuilder::new(1024)
            .with_memory_type(MemoryType::Persistent)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test_log::test]
    fn test_build_volatile() {
        let parent = MemTracker::new_root("server");
        let cache = CacheBuilder::new(1024)
            .with_name("block")
            .with_shards(ShardCount::Fixed(2))
            .with_eviction_policy(EvictionPolicy::Fifo)
            .with_parent_mem_tracker(parent.clone())
            .with_memtracker_approximation_ratio(0.0)
            .build()
            .unwrap();
        assert_eq!(cache.name(), "block");
        assert_eq!(cache.capacity(), 1024);
        assert_eq!(cache.shards(), 2);
        assert_eq!(cache.memory_type(), MemoryType::Volatile);
        assert_eq!(cache.eviction_policy(), EvictionPolicy::Fifo);

        let tracker = cache.mem_tracker().unwrap();
        assert_eq!(tracker.id(), "block-sharded_lru_cache");
        assert!(Arc::ptr_eq(tracker.parent().unwrap(), &parent));

        let mut pending = cache.allocate(b"k", 4, 10).unwrap();
        pending.mutable_value().copy_from_slice(b"vvvv");
        let entry = cache.insert(pending, None);
        assert_eq!(&*entry, b"vvvv");
        assert_eq!(parent.consumption(), 10);

        drop(entry);
        cache.erase(b"k");
        assert_eq!(parent.consumption(), 0);
        assert_eq!(parent.peak_consumption(), 10);
    }

    #[test_log::test]
    fn test_pending_entry_owner() {
        let a = CacheBuilder::new(1024).build().unwrap();
        let b = CacheBuilder::new(1024).build().unwrap();

        let pending = a.allocate(b"k", 4, 1).unwrap();
        assert!(pending.is_allocated_by(&a));
        assert!(!pending.is_allocated_by(&b));
        assert!(pending.is_allocated_by(&a.clone()));
    }

    #[cfg(any(debug_assertions, feature = "strict_assertions"))]
    #[test]
    #[should_panic]
    fn test_insert_into_other_cache() {
        let a = CacheBuilder::new(1024).build().unwrap();
        let b = CacheBuilder::new(1024).build().unwrap();

        let pending = a.allocate(b"k", 4, 1).unwrap();
        b.insert(pending, None);
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_build_persistent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheBuilder::new(1 << 20)
            .with_memory_type(MemoryType::Persistent)
            .with_nvm_cache_path(dir.path())
            .build()
            .unwrap();
        assert_eq!(cache.memory_type(), MemoryType::Persistent);
        assert!(cache.mem_tracker().is_none());

        let mut pending = cache.allocate(b"k", 4, Charge::Automatic).unwrap();
        pending.mutable_value().copy_from_slice(b"pmem");
        let entry = cache.insert(pending, None);
        let found = cache.lookup(b"k", CacheBehavior::ExpectInCache).unwrap();
        assert_eq!(found.value(), b"pmem");
        assert_eq!(entry.charge(), found.charge());
    }
}
