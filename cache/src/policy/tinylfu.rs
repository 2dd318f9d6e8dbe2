use super::slru::SlruState;
use super::{AdmissionDecision, CachePolicy};
use crate::policy::lru_list::LruList;

use parking_lot::Mutex;
use std::hash::Hash;

/// The unified mutable state of W-TinyLFU, held under a single lock.
#[derive(Debug)]
struct TinyLfuState<K: Eq + Hash + Clone> {
  window: LruList<K>,
  main: SlruState<K>,
  sketch: cms::CountMinSketch,
}

/// W-TinyLFU: a small LRU "window" in front of a segmented LRU "main" space,
/// with a frequency sketch deciding which keys may enter the main space.
///
/// New keys land in the window. Keys falling out of the window move into the
/// main space, unless the cache is full, in which case they must be estimated
/// as more popular than the main space's next victim.
#[derive(Debug)]
pub struct TinyLfuPolicy<K: Eq + Hash + Clone> {
  state: Mutex<TinyLfuState<K>>,
  capacity: u64,
  window_capacity: u64,
}

impl<K: Eq + Hash + Clone> TinyLfuPolicy<K> {
  /// A policy for a cache bounded at `capacity` total weight.
  pub fn new(capacity: u64) -> Self {
    // The window is ~1% of the total.
    let window_capacity = if capacity == 0 {
      0
    } else {
      ((capacity as f64 * 0.01).round() as u64).max(1)
    };
    let main_capacity = capacity.saturating_sub(window_capacity);

    Self {
      state: Mutex::new(TinyLfuState {
        window: LruList::new(),
        main: SlruState::new(main_capacity),
        sketch: cms::CountMinSketch::new(capacity.saturating_mul(10).max(100)),
      }),
      capacity,
      window_capacity,
    }
  }
}

impl<K> CachePolicy<K> for TinyLfuPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, key: &K, _weight: u64) {
    let mut state = self.state.lock();
    state.sketch.increment(key);
    if !state.window.touch(key) {
      state.main.access(key, None);
    }
  }

  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K> {
    let mut state = self.state.lock();
    state.sketch.increment(key);

    // A rewrite of a tracked key is an access with a new weight.
    if state.window.contains(key) {
      state.window.push_front(key.clone(), weight);
      return AdmissionDecision::Admit;
    }
    if state.main.contains(key) {
      state.main.access(key, Some(weight));
      return AdmissionDecision::Admit;
    }

    state.window.push_front(key.clone(), weight);

    let mut rejected = Vec::new();
    while state.window.total_weight() > self.window_capacity {
      let Some((candidate, candidate_weight)) = state.window.pop_back() else {
        break;
      };

      let total = state.window.total_weight() + state.main.total_weight() + candidate_weight;
      let admit = total <= self.capacity
        || match state.main.peek_victim() {
          Some(victim) => state.sketch.estimate(&candidate) > state.sketch.estimate(victim),
          None => true,
        };

      if admit {
        state.main.admit(candidate, candidate_weight);
      } else {
        rejected.push(candidate);
      }
    }

    if rejected.is_empty() {
      AdmissionDecision::Admit
    } else if rejected.len() == 1 && rejected[0] == *key {
      AdmissionDecision::Reject
    } else {
      AdmissionDecision::AdmitAndEvict(rejected)
    }
  }

  fn on_remove(&self, key: &K) {
    let mut state = self.state.lock();
    if state.window.remove(key).is_none() {
      state.main.remove(key);
    }
  }

  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64) {
    if weight_to_free == 0 {
      return (Vec::new(), 0);
    }
    let mut state = self.state.lock();
    let mut victims = Vec::new();
    let mut freed = state.main.evict(weight_to_free, &mut victims);

    // The main space is empty; take from the window.
    while freed < weight_to_free {
      match state.window.pop_back() {
        Some((key, weight)) => {
          freed = freed.saturating_add(weight);
          victims.push(key);
        }
        None => break,
      }
    }
    (victims, freed)
  }

  fn clear(&self) {
    let mut state = self.state.lock();
    state.window.clear();
    state.main.clear();
    state.sketch.clear();
  }
}

mod cms {
  use std::hash::{BuildHasher, Hash};

  const DEPTH: usize = 4;
  const MAX_WIDTH: usize = 1 << 24;

  /// A count-min sketch with periodic aging. Counters are halved every
  /// `reset_threshold` increments so that old popularity fades.
  #[derive(Debug)]
  pub(super) struct CountMinSketch {
    counters: Vec<Vec<u32>>,
    hashers: Vec<ahash::RandomState>,
    increments: u64,
    reset_threshold: u64,
  }

  impl CountMinSketch {
    pub(super) fn new(reset_threshold: u64) -> Self {
      let wanted = usize::try_from(reset_threshold / 2).unwrap_or(MAX_WIDTH);
      let width = wanted.clamp(256, MAX_WIDTH).next_power_of_two();
      Self {
        counters: (0..DEPTH).map(|_| vec![0u32; width]).collect(),
        hashers: (0..DEPTH).map(|_| ahash::RandomState::new()).collect(),
        increments: 0,
        reset_threshold,
      }
    }

    #[inline]
    fn slot<K: Hash>(&self, row: usize, key: &K) -> usize {
      self.hashers[row].hash_one(key) as usize & (self.counters[row].len() - 1)
    }

    pub(super) fn increment<K: Hash>(&mut self, key: &K) {
      for row in 0..DEPTH {
        let index = self.slot(row, key);
        let counter = &mut self.counters[row][index];
        *counter = counter.saturating_add(1);
      }
      self.increments += 1;
      if self.increments >= self.reset_threshold {
        self.age();
      }
    }

    pub(super) fn estimate<K: Hash>(&self, key: &K) -> u32 {
      (0..DEPTH)
        .map(|row| self.counters[row][self.slot(row, key)])
        .min()
        .unwrap_or(0)
    }

    fn age(&mut self) {
      self.increments = 0;
      for row in &mut self.counters {
        for counter in row.iter_mut() {
          *counter /= 2;
        }
      }
    }

    pub(super) fn clear(&mut self) {
      self.increments = 0;
      for row in &mut self.counters {
        row.fill(0);
      }
    }

    #[cfg(test)]
    pub(super) fn force_age(&mut self) {
      self.age();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn admit(policy: &TinyLfuPolicy<i32>, key: i32) -> AdmissionDecision<i32> {
    policy.on_admit(&key, 1)
  }

  #[test]
  fn new_item_goes_to_window() {
    let policy = TinyLfuPolicy::new(100);
    assert_eq!(admit(&policy, 1), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.window.contains(&1));
    assert!(!state.main.contains(&1));
  }

  #[test]
  fn window_overflow_moves_to_main_while_there_is_room() {
    let policy = TinyLfuPolicy::new(100); // window = 1
    admit(&policy, 1);
    assert_eq!(admit(&policy, 2), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.window.contains(&2));
    assert!(state.main.probationary.contains(&1));
  }

  #[test]
  fn cold_candidate_is_rejected_when_full() {
    let policy = TinyLfuPolicy::new(3); // window = 1, main = 2
    admit(&policy, 100);
    admit(&policy, 101);
    admit(&policy, 102);
    // Make the main space popular.
    for _ in 0..5 {
      policy.on_access(&100, 1);
      policy.on_access(&101, 1);
    }

    // 102 falls out of the window but the cache is full and 102 is cold.
    match admit(&policy, 1) {
      AdmissionDecision::AdmitAndEvict(victims) => assert_eq!(victims, vec![102]),
      other => panic!("expected AdmitAndEvict, got {other:?}"),
    }
    let state = policy.state.lock();
    assert!(state.window.contains(&1));
    assert!(!state.main.contains(&102));
  }

  #[test]
  fn hot_candidate_is_admitted_when_full() {
    let policy = TinyLfuPolicy::new(3);
    admit(&policy, 100);
    admit(&policy, 101);
    admit(&policy, 102);
    for _ in 0..5 {
      policy.on_access(&102, 1);
    }

    assert_eq!(admit(&policy, 1), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.main.contains(&102));
    // The main space is now over budget; eviction settles it.
    drop(state);
    let (victims, freed) = policy.evict(1);
    assert_eq!(freed, 1);
    assert_eq!(victims.len(), 1);
    assert_ne!(victims[0], 102);
  }

  #[test]
  fn heavy_write_can_push_itself_out() {
    let policy = TinyLfuPolicy::new(2); // window = 1, main = 1
    admit(&policy, 100);
    admit(&policy, 101); // 100 -> main
    for _ in 0..5 {
      policy.on_access(&100, 1);
    }
    assert_eq!(
      policy.on_admit(&7, 5),
      AdmissionDecision::AdmitAndEvict(vec![101, 7])
    );
  }

  #[test]
  fn lone_cold_write_is_rejected() {
    let policy = TinyLfuPolicy::new(1); // window = 1, main = 0
    admit(&policy, 100);
    assert_eq!(policy.on_admit(&7, 5), AdmissionDecision::Reject);
    assert!(!policy.state.lock().window.contains(&7));
  }

  #[test]
  fn rewrite_updates_weight_in_place() {
    let policy = TinyLfuPolicy::new(100);
    admit(&policy, 1);
    admit(&policy, 2); // 1 -> main probation
    assert_eq!(policy.on_admit(&1, 5), AdmissionDecision::Admit);
    let state = policy.state.lock();
    assert!(state.main.protected.contains(&1));
    assert_eq!(state.main.protected.weight_of(&1), Some(5));
  }

  #[test]
  fn evict_drains_main_then_window() {
    let policy = TinyLfuPolicy::new(100);
    admit(&policy, 1);
    admit(&policy, 2);
    let (victims, freed) = policy.evict(10);
    assert_eq!(victims, vec![1, 2]);
    assert_eq!(freed, 2);
    assert!(policy.evict(1).0.is_empty());
  }

  #[test]
  fn zero_capacity_still_tracks_for_eviction() {
    let policy = TinyLfuPolicy::new(0);
    assert_eq!(admit(&policy, 1), AdmissionDecision::Admit);
    let (victims, _) = policy.evict(1);
    assert_eq!(victims, vec![1]);
  }

  #[test]
  fn removed_keys_are_forgotten() {
    let policy = TinyLfuPolicy::new(100);
    admit(&policy, 1);
    admit(&policy, 2);
    policy.on_remove(&1);
    policy.on_remove(&2);
    assert!(policy.evict(10).0.is_empty());
  }

  #[test]
  fn sketch_ages_counters() {
    let mut sketch = cms::CountMinSketch::new(1_000);
    for _ in 0..8 {
      sketch.increment(&"hot");
    }
    assert!(sketch.estimate(&"hot") >= 8);
    sketch.force_age();
    assert!(sketch.estimate(&"hot") >= 4 && sketch.estimate(&"hot") < 8);
    sketch.clear();
    assert_eq!(sketch.estimate(&"hot"), 0);
  }
}
