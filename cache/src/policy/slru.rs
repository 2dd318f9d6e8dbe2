use crate::policy::lru_list::LruList;

use std::hash::Hash;

/// A segmented LRU: new keys enter the probationary segment and move to the
/// protected segment when read again. The protected segment is capped; its
/// overflow is demoted back to the head of probation.
#[derive(Debug)]
pub(crate) struct SlruState<K: Eq + Hash + Clone> {
  pub(crate) probationary: LruList<K>,
  pub(crate) protected: LruList<K>,
  protected_capacity: u64,
}

impl<K: Eq + Hash + Clone> SlruState<K> {
  /// A segmented LRU of total `capacity`, 80% of which may be protected.
  pub(crate) fn new(capacity: u64) -> Self {
    let probation_capacity = if capacity == 0 {
      0
    } else {
      ((capacity as f64 * 0.20).round() as u64).max(1)
    };
    Self {
      probationary: LruList::new(),
      protected: LruList::new(),
      protected_capacity: capacity.saturating_sub(probation_capacity),
    }
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.probationary.contains(key) || self.protected.contains(key)
  }

  pub(crate) fn total_weight(&self) -> u64 {
    self.probationary.total_weight() + self.protected.total_weight()
  }

  fn demote_overflow(&mut self) {
    while self.protected.total_weight() > self.protected_capacity {
      match self.protected.pop_back() {
        Some((key, weight)) => self.probationary.push_front(key, weight),
        None => break,
      }
    }
  }

  /// The key that would be evicted next.
  pub(crate) fn peek_victim(&self) -> Option<&K> {
    self
      .probationary
      .peek_back()
      .or_else(|| self.protected.peek_back())
  }

  /// Admits a key that is not yet in either segment.
  pub(crate) fn admit(&mut self, key: K, weight: u64) {
    self.probationary.push_front(key, weight);
  }

  /// Records a hit on a key already in the main space. `weight` updates the
  /// key's weight when given.
  pub(crate) fn access(&mut self, key: &K, weight: Option<u64>) {
    if self.protected.contains(key) {
      match weight {
        Some(w) => self.protected.push_front(key.clone(), w),
        None => {
          self.protected.touch(key);
        }
      }
      return;
    }
    if let Some(old) = self.probationary.remove(key) {
      self.protected.push_front(key.clone(), weight.unwrap_or(old));
      self.demote_overflow();
    }
  }

  pub(crate) fn remove(&mut self, key: &K) -> Option<u64> {
    self
      .probationary
      .remove(key)
      .or_else(|| self.protected.remove(key))
  }

  /// Pops victims, probation first, until `weight_to_free` is covered or the
  /// segments are empty.
  pub(crate) fn evict(&mut self, weight_to_free: u64, victims: &mut Vec<K>) -> u64 {
    let mut freed = 0u64;
    while freed < weight_to_free {
      let next = self
        .probationary
        .pop_back()
        .or_else(|| self.protected.pop_back());
      match next {
        Some((key, weight)) => {
          freed = freed.saturating_add(weight);
          victims.push(key);
        }
        None => break,
      }
    }
    freed
  }

  pub(crate) fn clear(&mut self) {
    self.probationary.clear();
    self.protected.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_access_promotes_to_protected() {
    let mut slru = SlruState::new(10);
    slru.admit(1, 1);
    assert!(slru.probationary.contains(&1));

    slru.access(&1, None);
    assert!(slru.protected.contains(&1));
    assert!(!slru.probationary.contains(&1));
  }

  #[test]
  fn protected_overflow_is_demoted() {
    // capacity 5 -> probation 1, protected 4
    let mut slru = SlruState::new(5);
    for key in 0..5 {
      slru.admit(key, 1);
      slru.access(&key, None);
    }
    assert_eq!(slru.protected.total_weight(), 4);
    // The oldest protected key was pushed back to probation.
    assert!(slru.probationary.contains(&0));
    assert_eq!(slru.peek_victim(), Some(&0));
  }

  #[test]
  fn evict_takes_probation_before_protected() {
    let mut slru = SlruState::new(100);
    slru.admit(1, 1);
    slru.admit(2, 1);
    slru.access(&2, None);

    let mut victims = Vec::new();
    let freed = slru.evict(2, &mut victims);
    assert_eq!(freed, 2);
    assert_eq!(victims, vec![1, 2]);
    assert_eq!(slru.total_weight(), 0);
  }
}
