use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

pub(crate) type Shard<K, V, H> = RwLock<HashMap<K, Arc<CacheEntry<V>>, H>>;

/// A cache store that is partitioned into multiple, independently locked shards.
///
/// This design allows for high concurrency by ensuring that operations on
/// different keys are unlikely to contend for the same lock.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore` with the specified number of shards and hasher.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect();

    Self { shards, hasher }
  }

  #[inline]
  pub(crate) fn hasher(&self) -> &H {
    &self.hasher
  }

  #[cfg(test)]
  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// Index of the shard owning `key`. Shard counts are validated to be
  /// non-zero by the builder.
  #[inline]
  pub(crate) fn shard_index(&self, key: &K) -> usize {
    hash_key(&self.hasher, key) as usize % self.shards.len()
  }

  /// Returns the lock guarding the shard for a given key.
  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &Shard<K, V, H> {
    &self.shards[self.shard_index(key)]
  }

  /// Returns an iterator over all the shard locks.
  /// This is used by "stop-the-world" operations like `clear()` and sweeps.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded| &**padded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keys_are_routed_to_a_stable_shard() {
    let store: ShardedStore<u64, u64, ahash::RandomState> =
      ShardedStore::new(8, ahash::RandomState::new());
    assert_eq!(store.num_shards(), 8);
    for key in 0..100u64 {
      let index = store.shard_index(&key);
      assert!(index < 8);
      assert_eq!(index, store.shard_index(&key));
    }
  }

  #[test]
  fn shards_are_independent_maps() {
    let store: ShardedStore<u64, &str, ahash::RandomState> =
      ShardedStore::new(4, ahash::RandomState::new());
    let entry = Arc::new(CacheEntry::new(Arc::new("v"), 1, 0, u64::MAX));
    store.shard(&7).write().insert(7, entry);
    let total: usize = store.iter_shards().map(|s| s.read().len()).sum();
    assert_eq!(total, 1);
    assert!(store.shard(&7).read().contains_key(&7));
  }
}
