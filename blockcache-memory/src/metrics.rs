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

use std::borrow::Cow;

use blockcache_common::metrics::{registry::noop::NoopMetricsRegistry, BoxedCounter, BoxedGauge, RegistryOps};

/// Metrics of a block cache.
///
/// `*_caching` counters only move for lookups issued with [`crate::CacheBehavior::ExpectInCache`].
#[derive(Debug)]
pub struct CacheMetrics {
    /// Entries published into the cache.
    pub insert: BoxedCounter,
    /// Lookups of any kind.
    pub lookup: BoxedCounter,
    /// Entries whose storage was reclaimed, whatever removed them from the cache.
    pub evict: BoxedCounter,
    /// Lookup hits.
    pub hit: BoxedCounter,
    /// Lookup hits that expected the key to be cached.
    pub hit_caching: BoxedCounter,
    /// Lookup misses.
    pub miss: BoxedCounter,
    /// Lookup misses that expected the key to be cached.
    pub miss_caching: BoxedCounter,
    /// Hits on entries whose time-to-live had passed.
    pub hit_expired: BoxedCounter,
    /// Reclaimed entries whose time-to-live had passed.
    pub evict_expired: BoxedCounter,

    /// Sum of the charges of entries not reclaimed yet.
    pub usage: BoxedGauge,
}

impl CacheMetrics {
    /// Register the metrics of the cache named `name` on `registry`.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &impl RegistryOps) -> Self {
        let name = name.into();

        let blockcache_memory_op_total = registry.register_counter_vec(
            "blockcache_memory_op_total".into(),
            "blockcache in-memory cache operations".into(),
            &["name", "op"],
        );
        let blockcache_memory_usage = registry.register_gauge_vec(
            "blockcache_memory_usage".into(),
            "blockcache in-memory cache usage".into(),
            &["name"],
        );

        let op = |op: &'static str| blockcache_memory_op_total.counter(&[name.clone(), op.into()]);

        let insert = op("insert");
        let lookup = op("lookup");
        let evict = op("evict");
        let hit = op("hit");
        let hit_caching = op("hit_caching");
        let miss = op("miss");
        let miss_caching = op("miss_caching");
        let hit_expired = op("hit_expired");
        let evict_expired = op("evict_expired");

        let usage = blockcache_memory_usage.gauge(&[name.clone()]);

        Self {
            insert,
            lookup,
            evict,
            hit,
            hit_caching,
            miss,
            miss_caching,
            hit_expired,
            evict_expired,
            usage,
        }
    }

    /// Metrics that go nowhere.
    pub fn noop() -> Self {
        Self::new("noop", &NoopMetricsRegistry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingMetricsRegistry;

    #[test]
    fn test_cache_metrics_labels() {
        let registry = RecordingMetricsRegistry::default();
        let metrics = CacheMetrics::new("block", &registry);

        metrics.hit.increase(2);
        metrics.evict_expired.increase(1);
        metrics.usage.absolute(42);

        assert_eq!(registry.counter("blockcache_memory_op_total", &["block", "hit"]), 2);
        assert_eq!(registry.counter("blockcache_memory_op_total", &["block", "evict_expired"]), 1);
        assert_eq!(registry.counter("blockcache_memory_op_total", &["block", "miss"]), 0);
        assert_eq!(registry.gauge("blockcache_memory_usage", &["block"]), 42);
    }
}
