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

use std::hash::{BuildHasher, Hasher};

use twox_hash::XxHash64;

/// Hash builder requirements shared by all cache components.
pub trait HashBuilder: BuildHasher + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Send + Sync + 'static {}

/// Seeded xxHash64 builder.
///
/// The hash of a key is stable across processes, which keeps shard routing reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct XxHash64Builder {
    seed: u64,
}

impl XxHash64Builder {
    /// Create a builder with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl BuildHasher for XxHash64Builder {
    type Hasher = XxHash64;

    fn build_hasher(&self) -> Self::Hasher {
        XxHash64::with_seed(self.seed)
    }
}

/// A hasher whose result is the trailing eight bytes written into it, big-endian.
///
/// Only useful for tests that need to predict which shard a key lands in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModHasher {
    state: u64,
}

impl Hasher for ModHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state = (self.state << 8) + *byte as u64;
        }
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_be_bytes())
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_be_bytes())
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_be_bytes())
    }

    fn write_usize(&mut self, i: usize) {
        self.write(&i.to_be_bytes())
    }
}

impl BuildHasher for ModHasher {
    type Hasher = Self;

    fn build_hasher(&self) -> Self::Hasher {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_hasher_keeps_trailing_bytes() {
        for i in 0..=255u8 {
            assert_eq!(i as u64, ModHasher::default().hash_one([0u8, 0, 0, i].as_slice()) & 0xff);
        }
        assert_eq!(0x0102, ModHasher::default().hash_one(0x0102u16));
    }

    #[test]
    fn test_xxhash64_builder_is_deterministic() {
        let a = XxHash64Builder::default();
        let b = XxHash64Builder::default();
        let key: &[u8] = b"block-42";
        assert_eq!(a.hash_one(key), b.hash_one(key));
        assert_ne!(a.hash_one(key), XxHash64Builder::with_seed(7).hash_one(key));
    }
}
