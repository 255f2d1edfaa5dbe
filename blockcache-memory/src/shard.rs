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

use std::sync::Arc;

use blockcache_common::{
    slab::{Slab, Token},
    strict_assert, strict_assert_eq,
};
use hashbrown::HashTable;

use crate::{
    backend::MemoryBackend,
    eviction::{EvictionPolicy, OrderList, Slot},
    record::Record,
};

/// Why a record left its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Evicted to make room.
    Evict,
    /// Overwritten by a newer entry with the same key.
    Replace,
    /// Erased by the user.
    Remove,
    /// Dropped by a cache clear.
    Clear,
}

/// Records whose last reference was dropped under the shard lock.
///
/// They are reclaimed after the lock is released.
pub type Garbages<B> = Vec<(Event, Arc<Record<B>>)>;

/// One independently locked partition of the cache.
///
/// Invariants:
///
/// - the table holds exactly the records with `in_cache == true`;
/// - with [`EvictionPolicy::Lru`], the order list holds exactly the in-cache records with `refs == 1`;
/// - with [`EvictionPolicy::Fifo`], the order list holds every in-cache record, pinned or not;
/// - `usage` is the sum of the charges of in-cache records.
pub struct RawCacheShard<B>
where
    B: MemoryBackend,
{
    table: HashTable<(u64, Token)>,
    slab: Slab<Slot<B>>,
    order: OrderList,
    policy: EvictionPolicy,

    usage: usize,
    capacity: usize,
}

impl<B> RawCacheShard<B>
where
    B: MemoryBackend,
{
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            table: HashTable::new(),
            slab: Slab::new(),
            order: OrderList::default(),
            policy,
            usage: 0,
            capacity,
        }
    }

    pub fn usage(&self) -> usize {
        self.usage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    fn find(&self, hash: u64, key: &[u8]) -> Option<Token> {
        let slab = &self.slab;
        self.table
            .find(hash, |&(h, t)| {
                h == hash && slab.get(t).is_some_and(|slot| slot.record.key() == key)
            })
            .map(|&(_, t)| t)
    }

    fn find_record(&self, record: &Arc<Record<B>>) -> Option<Token> {
        let slab = &self.slab;
        self.table
            .find(record.hash(), |&(_, t)| {
                slab.get(t).is_some_and(|slot| Arc::ptr_eq(&slot.record, record))
            })
            .map(|&(_, t)| t)
    }

    /// Take the record referred by `token` out of the table and the order list.
    ///
    /// The table's reference is handed back to the caller, which must drop it with `dec_refs`.
    fn detach(&mut self, hash: u64, token: Token) -> Option<Arc<Record<B>>> {
        let entry = self.table.find_entry(hash, |&(_, t)| t == token).ok()?;
        entry.remove();

        if self.slab.get(token).is_some_and(|slot| slot.record.is_in_eviction()) {
            self.order.remove(&mut self.slab, token);
        }
        let record = self.slab.remove(token)?.record;
        strict_assert!(record.is_in_cache());
        record.set_in_cache(false);
        self.usage = self.usage.saturating_sub(record.charge());
        Some(record)
    }

    fn detach_and_release(&mut self, hash: u64, token: Token, event: Event, garbages: &mut Garbages<B>) {
        if let Some(record) = self.detach(hash, token) {
            if record.dec_refs(1) == 0 {
                garbages.push((event, record));
            }
        }
    }

    /// Publish `record`, taking one reference for the table and one for the caller.
    ///
    /// An in-cache record with the same key is replaced, then unpinned records are evicted until the new charge fits.
    pub fn insert(&mut self, record: Arc<Record<B>>, garbages: &mut Garbages<B>) {
        let hash = record.hash();

        if let Some(token) = self.find(hash, record.key()) {
            self.detach_and_release(hash, token, Event::Replace, garbages);
        }

        self.evict(self.capacity.saturating_sub(record.charge()), garbages);

        record.set_in_cache(true);
        record.inc_refs(2);
        self.usage = self.usage.saturating_add(record.charge());

        let token = self.slab.insert(Slot::new(record));
        self.table.insert_unique(hash, (hash, token), |&(h, _)| h);
        if self.policy == EvictionPolicy::Fifo {
            self.order.push_back(&mut self.slab, token);
        }
    }

    /// Evict records from the head of the order list until `usage <= target` or the list is exhausted.
    pub fn evict(&mut self, target: usize, garbages: &mut Garbages<B>) {
        while self.usage > target {
            if self.evict_oldest(garbages).is_none() {
                break;
            }
        }
    }

    /// Evict the record at the head of the order list, if any. Returns its charge.
    pub fn evict_oldest(&mut self, garbages: &mut Garbages<B>) -> Option<usize> {
        let token = self.order.front()?;
        let (hash, charge) = {
            let record = &self.slab.get(token)?.record;
            if self.policy == EvictionPolicy::Lru {
                strict_assert_eq!(record.refs(), 1);
            }
            (record.hash(), record.charge())
        };
        self.detach_and_release(hash, token, Event::Evict, garbages);
        Some(charge)
    }

    /// Take one more reference of the in-cache record with the given key.
    pub fn lookup(&mut self, hash: u64, key: &[u8]) -> Option<Arc<Record<B>>> {
        let token = self.find(hash, key)?;
        let record = self.slab.get(token)?.record.clone();

        if self.policy == EvictionPolicy::Lru && record.is_in_eviction() {
            self.order.remove(&mut self.slab, token);
        }
        record.inc_refs(1);
        Some(record)
    }

    pub fn contains(&self, hash: u64, key: &[u8]) -> bool {
        self.find(hash, key).is_some()
    }

    /// Drop one reference of `record`. Returns `true` if it was the last one.
    pub fn release(&mut self, record: &Arc<Record<B>>) -> bool {
        let refs = record.dec_refs(1);
        if refs == 1 && record.is_in_cache() && self.policy == EvictionPolicy::Lru {
            if let Some(token) = self.find_record(record) {
                self.order.push_back(&mut self.slab, token);
            }
        }
        refs == 0
    }

    pub fn erase(&mut self, hash: u64, key: &[u8], garbages: &mut Garbages<B>) {
        if let Some(token) = self.find(hash, key) {
            self.detach_and_release(hash, token, Event::Remove, garbages);
        }
    }

    /// Drop every in-cache record. Pinned records stay readable through their handles.
    pub fn clear(&mut self, garbages: &mut Garbages<B>) {
        tracing::debug!("[shard]: clear {} records, usage: {}", self.slab.len(), self.usage);

        self.table.clear();
        self.order.clear();
        for slot in self.slab.drain() {
            let record = slot.record;
            record.set_in_eviction(false);
            record.set_in_cache(false);
            if record.dec_refs(1) == 0 {
                garbages.push((Event::Clear, record));
            }
        }
        self.usage = 0;
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::{backend::VolatileBackend, record::Data};

    fn record(key: u64, charge: usize) -> Arc<Record<VolatileBackend>> {
        let data = Data {
            key: key.to_be_bytes().into(),
            value: VolatileBackend::new().allocate(0).unwrap(),
            hash: key,
            charge,
        };
        Arc::new(Record::new(data, None))
    }

    fn order(shard: &RawCacheShard<VolatileBackend>) -> Vec<u64> {
        shard
            .order
            .tokens(&shard.slab)
            .into_iter()
            .map(|t| shard.slab.get(t).unwrap().record.hash())
            .collect_vec()
    }

    /// Insert and immediately drop the caller's reference.
    fn put(shard: &mut RawCacheShard<VolatileBackend>, key: u64, charge: usize) -> Garbages<VolatileBackend> {
        let mut garbages = vec![];
        let r = record(key, charge);
        shard.insert(r.clone(), &mut garbages);
        assert!(!shard.release(&r));
        garbages
    }

    #[test]
    fn test_shard_lru_order() {
        let mut shard = RawCacheShard::new(4, EvictionPolicy::Lru);
        for i in 0..4 {
            assert!(put(&mut shard, i, 1).is_empty());
        }
        assert_eq!(order(&shard), vec![0, 1, 2, 3]);

        let r = shard.lookup(1, &1u64.to_be_bytes()).unwrap();
        assert_eq!(order(&shard), vec![0, 2, 3]);
        assert!(!shard.release(&r));
        assert_eq!(order(&shard), vec![0, 2, 3, 1]);

        let garbages = put(&mut shard, 4, 1);
        assert_eq!(garbages.len(), 1);
        assert_eq!(garbages[0].0, Event::Evict);
        assert_eq!(garbages[0].1.hash(), 0);
        assert_eq!(order(&shard), vec![2, 3, 1, 4]);
        assert_eq!(shard.usage(), 4);
    }

    #[test]
    fn test_shard_lru_skips_pinned() {
        let mut shard = RawCacheShard::new(2, EvictionPolicy::Lru);
        put(&mut shard, 0, 1);
        put(&mut shard, 1, 1);
        let pinned = shard.lookup(0, &0u64.to_be_bytes()).unwrap();

        let garbages = put(&mut shard, 2, 1);
        assert_eq!(garbages.iter().map(|(_, r)| r.hash()).collect_vec(), vec![1]);
        assert!(shard.contains(0, &0u64.to_be_bytes()));

        // Nothing unpinned is left besides the new entry, so usage overshoots.
        let garbages = put(&mut shard, 3, 1);
        assert_eq!(garbages.iter().map(|(_, r)| r.hash()).collect_vec(), vec![2]);
        assert_eq!(shard.usage(), 2);

        let mut garbages = vec![];
        let big = record(4, 3);
        shard.insert(big.clone(), &mut garbages);
        assert_eq!(shard.usage(), 4);
        assert!(shard.contains(0, &0u64.to_be_bytes()));
        assert!(!shard.release(&big));
        assert!(!shard.release(&pinned));
    }

    #[test]
    fn test_shard_fifo_order() {
        let mut shard = RawCacheShard::new(3, EvictionPolicy::Fifo);
        for i in 0..3 {
            put(&mut shard, i, 1);
        }
        let r = shard.lookup(0, &0u64.to_be_bytes()).unwrap();
        assert_eq!(order(&shard), vec![0, 1, 2]);

        // Hits do not reorder, and the pinned oldest entry still leaves the cache.
        let garbages = put(&mut shard, 3, 1);
        assert!(garbages.is_empty());
        assert_eq!(order(&shard), vec![1, 2, 3]);
        assert!(!shard.contains(0, &0u64.to_be_bytes()));
        assert!(!r.is_in_cache());
        assert_eq!(shard.usage(), 3);

        // Its teardown waits for the last handle.
        assert!(shard.release(&r));

        let garbages = put(&mut shard, 4, 1);
        assert_eq!(garbages.iter().map(|(_, r)| r.hash()).collect_vec(), vec![1]);
        assert_eq!(order(&shard), vec![2, 3, 4]);
    }

    #[test]
    fn test_shard_replace_and_erase() {
        let mut shard = RawCacheShard::new(16, EvictionPolicy::Lru);
        let mut garbages = vec![];

        let old = record(7, 2);
        shard.insert(old.clone(), &mut garbages);
        let new = record(7, 3);
        shard.insert(new.clone(), &mut garbages);
        assert!(garbages.is_empty());
        assert!(!old.is_in_cache());
        assert_eq!(old.refs(), 1);
        assert_eq!(shard.usage(), 3);
        assert_eq!(shard.len(), 1);

        assert!(shard.release(&old));

        shard.erase(7, &7u64.to_be_bytes(), &mut garbages);
        assert!(garbages.is_empty());
        assert_eq!(shard.usage(), 0);
        assert!(shard.release(&new));

        shard.erase(7, &7u64.to_be_bytes(), &mut garbages);
        assert!(garbages.is_empty());
    }

    #[test]
    fn test_shard_clear() {
        let mut shard = RawCacheShard::new(16, EvictionPolicy::Lru);
        put(&mut shard, 0, 1);
        let mut garbages = vec![];
        let pinned = record(1, 1);
        shard.insert(pinned.clone(), &mut garbages);

        shard.clear(&mut garbages);
        assert_eq!(garbages.len(), 1);
        assert_eq!(garbages[0].0, Event::Clear);
        assert_eq!(shard.usage(), 0);
        assert_eq!(shard.len(), 0);
        assert!(!pinned.is_in_cache());
        assert!(shard.release(&pinned));
    }

    #[test]
    fn test_shard_evict_oldest() {
        let mut shard = RawCacheShard::new(16, EvictionPolicy::Lru);
        put(&mut shard, 0, 3);
        put(&mut shard, 1, 5);

        let mut garbages = vec![];
        assert_eq!(shard.evict_oldest(&mut garbages), Some(3));
        assert_eq!(shard.evict_oldest(&mut garbages), Some(5));
        assert_eq!(shard.evict_oldest(&mut garbages), None);
        assert_eq!(garbages.len(), 2);
    }
}
