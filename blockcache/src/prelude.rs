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

#[cfg(feature = "prometheus")]
pub use crate::common::metrics::registry::prometheus::PrometheusMetricsRegistry;
#[cfg(unix)]
pub use crate::memory::PersistentBackend;
pub use crate::{
    common::{
        hasher::{HashBuilder, ModHasher, XxHash64Builder},
        mem_tracker::MemTracker,
        metrics::{registry::noop::NoopMetricsRegistry, RegistryOps},
    },
    memory::{
        AllocError, Cache, CacheBehavior, CacheBuilder, CacheConfig, CacheEntry, CacheMetrics, Charge, Error,
        EvictionCallback, EvictionPolicy, MemoryBackend, MemoryType, PendingEntry, RawCache, RawCacheConfig,
        RawCacheEntry, RawPendingEntry, Result, ShardCount, TtlCache, TtlCacheBuilder, TtlEntry, VolatileBackend,
        MAX_CHARGE,
    },
};
