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
    strict_assert,
};
use serde::{Deserialize, Serialize};

use crate::{backend::MemoryBackend, record::Record};

/// Order in which entries leave a full shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Evict the least recently used unpinned entry.
    ///
    /// The order list only holds entries that nobody references, and a hit takes the entry off the list until its
    /// last handle is released.
    #[default]
    Lru,
    /// Evict in insertion order.
    ///
    /// The order list holds every entry in the cache and hits never reorder it. A pinned entry is evicted like any
    /// other: it leaves the cache at once and its storage is reclaimed when its last handle is released.
    Fifo,
}

/// Arena slot of a shard: the record plus its links in the order list.
pub struct Slot<B>
where
    B: MemoryBackend,
{
    pub record: Arc<Record<B>>,
    prev: Option<Token>,
    next: Option<Token>,
}

impl<B> Slot<B>
where
    B: MemoryBackend,
{
    pub fn new(record: Arc<Record<B>>) -> Self {
        Self {
            record,
            prev: None,
            next: None,
        }
    }
}

/// Doubly-linked order list threaded through the slots of a [`Slab`].
///
/// The head is the next eviction candidate, the tail the most recently pushed entry.
#[derive(Debug, Default)]
pub struct OrderList {
    head: Option<Token>,
    tail: Option<Token>,
    len: usize,
}

impl OrderList {
    pub fn push_back<B>(&mut self, slab: &mut Slab<Slot<B>>, token: Token)
    where
        B: MemoryBackend,
    {
        let tail = self.tail;
        let Some(slot) = slab.get_mut(token) else {
            strict_assert!(false, "push a vacant slot to the order list");
            return;
        };
        strict_assert!(!slot.record.is_in_eviction());
        slot.prev = tail;
        slot.next = None;
        slot.record.set_in_eviction(true);

        match tail.and_then(|t| slab.get_mut(t)) {
            Some(tail) => tail.next = Some(token),
            None => self.head = Some(token),
        }
        self.tail = Some(token);
        self.len += 1;
    }

    pub fn remove<B>(&mut self, slab: &mut Slab<Slot<B>>, token: Token)
    where
        B: MemoryBackend,
    {
        let Some(slot) = slab.get_mut(token) else {
            strict_assert!(false, "remove a vacant slot from the order list");
            return;
        };
        strict_assert!(slot.record.is_in_eviction());
        let (prev, next) = (slot.prev.take(), slot.next.take());
        slot.record.set_in_eviction(false);

        match prev.and_then(|t| slab.get_mut(t)) {
            Some(prev) => prev.next = next,
            None => self.head = next,
        }
        match next.and_then(|t| slab.get_mut(t)) {
            Some(next) => next.prev = prev,
            None => self.tail = prev,
        }
        strict_assert!(self.len > 0);
        self.len -= 1;
    }

    pub fn front(&self) -> Option<Token> {
        self.head
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Tokens from the head to the tail.
    #[cfg(test)]
    pub fn tokens<B>(&self, slab: &Slab<Slot<B>>) -> Vec<Token>
    where
        B: MemoryBackend,
    {
        std::iter::successors(self.head, |&t| slab.get(t).and_then(|slot| slot.next)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::VolatileBackend, record::Data};

    fn slot(hash: u64) -> Slot<VolatileBackend> {
        let data = Data {
            key: hash.to_be_bytes().into(),
            value: VolatileBackend::new().allocate(0).unwrap(),
            hash,
            charge: 1,
        };
        Slot::new(Arc::new(Record::new(data, None)))
    }

    #[test]
    fn test_order_list() {
        let mut slab = Slab::new();
        let mut list = OrderList::default();

        let tokens = (0..4).map(|i| slab.insert(slot(i))).collect::<Vec<_>>();
        for &t in &tokens {
            list.push_back(&mut slab, t);
        }
        assert_eq!(list.len(), 4);
        assert_eq!(list.tokens(&slab), tokens);
        assert!(slab.get(tokens[0]).unwrap().record.is_in_eviction());

        list.remove(&mut slab, tokens[0]);
        list.remove(&mut slab, tokens[2]);
        assert_eq!(list.tokens(&slab), vec![tokens[1], tokens[3]]);
        assert!(!slab.get(tokens[2]).unwrap().record.is_in_eviction());

        list.push_back(&mut slab, tokens[0]);
        list.remove(&mut slab, tokens[3]);
        assert_eq!(list.tokens(&slab), vec![tokens[1], tokens[0]]);
        assert_eq!(list.front(), Some(tokens[1]));

        list.remove(&mut slab, tokens[1]);
        list.remove(&mut slab, tokens[0]);
        assert_eq!(list.len(), 0);
        assert_eq!(list.front(), None);
    }
}
