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

//! A sharded, handle-based block cache.
//!
//! Entries are published in two phases: [`RawCache::allocate`] reserves value storage from the memory backend and
//! returns a pending entry the caller fills in place, then [`RawCache::insert`] makes it visible. Lookups hand out
//! counted handles that keep the value readable until they are dropped, even after the entry left the cache.
//!
//! [`Cache`] picks the memory backend from a [`CacheConfig`]. [`TtlCache`] is a FIFO cache of typed values with a
//! static time-to-live.

mod backend;
mod cache;
mod error;
mod eviction;
mod metrics;
mod raw;
mod record;
mod shard;
mod ttl;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

/// The exported types of the crate.
pub mod prelude;

pub use prelude::*;
