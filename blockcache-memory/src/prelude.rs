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

#[cfg(unix)]
pub use crate::backend::{PersistentBackend, PersistentBuffer, PMEM_ALIGN};
pub use crate::{
    backend::{AllocError, MemoryBackend, MemoryType, ValueBuffer, VolatileBackend, VolatileBuffer},
    cache::{Cache, CacheBuilder, CacheConfig, CacheEntry, PendingEntry, ShardCount, MAX_AUTO_SHARDS},
    error::{Error, MultipleError, Result},
    eviction::EvictionPolicy,
    metrics::CacheMetrics,
    raw::{CacheBehavior, Charge, RawCache, RawCacheConfig, RawCacheEntry, RawPendingEntry, MAX_CHARGE},
    record::EvictionCallback,
    ttl::{TtlCache, TtlCacheBuilder, TtlEntry},
};
