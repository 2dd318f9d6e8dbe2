use crate::store::hash_key;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicUsize, Ordering};

const BATCH_STRIPES: usize = 16; // Power of two for efficient bitmasking.

/// A double-buffered, striped batching mechanism for read events.
///
/// Many reader threads record hits with very low contention, and the single
/// maintenance thread drains everything recorded so far. Repeated reads of a
/// key between two drains coalesce into one event.
pub(crate) struct AccessBatcher<K> {
  active_idx: AtomicUsize,
  // Two independent sets of striped, coalescing buffers.
  instances: [Box<[Mutex<HashMap<K, u64>>]>; 2],
}

impl<K: Hash + Eq> AccessBatcher<K> {
  pub(crate) fn new() -> Self {
    let create_instance = || -> Box<[Mutex<HashMap<K, u64>>]> {
      (0..BATCH_STRIPES)
        .map(|_| Mutex::new(HashMap::new()))
        .collect()
    };
    Self {
      active_idx: AtomicUsize::new(0),
      instances: [create_instance(), create_instance()],
    }
  }

  /// Records a read. Called from the hit path.
  #[inline]
  pub(crate) fn record_access<H: BuildHasher>(&self, key: &K, weight: u64, hasher: &H)
  where
    K: Clone,
  {
    let idx = self.active_idx.load(Ordering::Acquire);
    let stripe_idx = hash_key(hasher, key) as usize & (BATCH_STRIPES - 1);
    self.instances[idx][stripe_idx]
      .lock()
      .insert(key.clone(), weight);
  }

  /// Flips the active buffer set and returns everything in the one that was
  /// active. Called by the maintenance holder only.
  pub(crate) fn drain(&self) -> HashMap<K, u64> {
    let drained_idx = self.active_idx.fetch_xor(1, Ordering::AcqRel);

    let mut batch = HashMap::new();
    for stripe in self.instances[drained_idx].iter() {
      let mut guard = stripe.lock();
      if !guard.is_empty() {
        batch.extend(std::mem::take(&mut *guard));
      }
    }
    batch
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn drains_coalesced_reads() {
    let hasher = ahash::RandomState::new();
    let batcher = AccessBatcher::new();
    batcher.record_access(&"a", 1, &hasher);
    batcher.record_access(&"a", 1, &hasher);
    batcher.record_access(&"b", 3, &hasher);

    let batch = batcher.drain();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.get("b"), Some(&3));
    assert!(batcher.drain().is_empty());
  }

  #[test]
  fn reads_after_a_drain_land_in_the_next_batch() {
    let hasher = ahash::RandomState::new();
    let batcher = AccessBatcher::new();
    batcher.record_access(&1, 1, &hasher);
    assert_eq!(batcher.drain().len(), 1);
    batcher.record_access(&2, 1, &hasher);
    let batch = batcher.drain();
    assert!(batch.contains_key(&2));
    assert!(!batch.contains_key(&1));
  }
}
