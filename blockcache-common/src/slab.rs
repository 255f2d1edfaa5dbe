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

use std::num::NonZeroUsize;

/// A stable reference to a value stored in a [`Slab`].
///
/// The token stays valid until the value is removed. `Option<Token>` has the same size as `Token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(NonZeroUsize);

impl Token {
    const MASK: usize = 1 << (usize::BITS - 1);

    fn new(index: usize) -> Self {
        match NonZeroUsize::new(index | Self::MASK) {
            Some(v) => Self(v),
            None => unreachable!(),
        }
    }

    /// Index of the slot the token refers to.
    pub fn index(&self) -> usize {
        self.0.get() & !Self::MASK
    }

    /// Rebuild a token from an index previously returned by [`Token::index`].
    pub fn from_index(index: usize) -> Self {
        Self::new(index)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Vacant(usize),
    Occupied(T),
}

/// A vector-backed arena with an intrusive free list.
///
/// Removed slots are reused by later insertions, so tokens must not be used after removal.
#[derive(Debug)]
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    len: usize,
    next: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Create an empty slab.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            next: 0,
        }
    }

    /// Create an empty slab with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            len: 0,
            next: 0,
        }
    }

    /// Store a value and return its token.
    pub fn insert(&mut self, val: T) -> Token {
        let index = self.next;
        self.len += 1;
        if index == self.slots.len() {
            self.slots.push(Slot::Occupied(val));
            self.next = index + 1;
        } else {
            self.next = match self.slots[index] {
                Slot::Vacant(next) => next,
                Slot::Occupied(_) => unreachable!("free list points to an occupied slot"),
            };
            self.slots[index] = Slot::Occupied(val);
        }
        Token::new(index)
    }

    /// Remove the value referred by `token`, if any.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        let index = token.index();
        let slot = self.slots.get_mut(index)?;
        if matches!(slot, Slot::Vacant(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::Vacant(self.next)) {
            Slot::Occupied(val) => {
                self.len -= 1;
                self.next = index;
                Some(val)
            }
            Slot::Vacant(_) => unreachable!(),
        }
    }

    /// Get the value referred by `token`.
    pub fn get(&self, token: Token) -> Option<&T> {
        match self.slots.get(token.index()) {
            Some(Slot::Occupied(val)) => Some(val),
            _ => None,
        }
    }

    /// Get the mutable value referred by `token`.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        match self.slots.get_mut(token.index()) {
            Some(Slot::Occupied(val)) => Some(val),
            _ => None,
        }
    }

    /// Iterate over all stored values with their tokens.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied(val) => Some((Token::new(index), val)),
            Slot::Vacant(_) => None,
        })
    }

    /// Remove every value, leaving the slab empty.
    pub fn drain(&mut self) -> impl Iterator<Item = T> {
        self.len = 0;
        self.next = 0;
        std::mem::take(&mut self.slots).into_iter().filter_map(|slot| match slot {
            Slot::Occupied(val) => Some(val),
            Slot::Vacant(_) => None,
        })
    }

    /// Count of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the slab stores nothing.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_token_niche() {
        assert_eq!(std::mem::size_of::<Token>(), std::mem::size_of::<Option<Token>>());
        assert_eq!(Token::new(42).index(), 42);
    }

    #[test]
    fn test_slab_reuses_vacant_slots() {
        let mut slab = Slab::with_capacity(4);
        let a = slab.insert("a");
        let b = slab.insert("b");
        let c = slab.insert("c");
        assert_eq!(slab.len(), 3);

        assert_eq!(slab.remove(b), Some("b"));
        assert_eq!(slab.remove(b), None);
        assert!(slab.get(b).is_none());

        let d = slab.insert("d");
        assert_eq!(d.index(), b.index());
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(c), Some(&"c"));
        assert_eq!(slab.get(d), Some(&"d"));

        *slab.get_mut(a).unwrap() = "A";
        let mut all = slab.iter().map(|(_, v)| *v).collect::<Vec<_>>();
        all.sort();
        assert_eq!(all, vec!["A", "c", "d"]);

        let mut drained = slab.drain().collect::<Vec<_>>();
        drained.sort();
        assert_eq!(drained, vec!["A", "c", "d"]);
        assert!(slab.is_empty());
        assert_eq!(slab.insert("e").index(), 0);
    }

    #[test_log::test]
    fn test_slab_fuzzy() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut slab = Slab::new();
        let mut model = HashMap::new();

        for i in 0..10000u64 {
            if model.is_empty() || rng.random_bool(0.6) {
                let token = slab.insert(i);
                assert!(model.insert(token, i).is_none());
            } else {
                let token = *model.keys().next().unwrap();
                let expected = model.remove(&token);
                assert_eq!(slab.remove(token), expected);
            }
            assert_eq!(slab.len(), model.len());
        }

        for (token, v) in model {
            assert_eq!(slab.get(token), Some(&v));
        }
    }
}
