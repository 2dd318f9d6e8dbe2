use crate::listener::RemovalCause;
use crate::policy::AdmissionDecision;
use crate::shared::{CacheShared, Removals};
use crate::task::notifier::Notification;
use crate::task::write_buffer::WriteEvent;

use std::hash::{BuildHasher, Hash};

/// Buffered writes that force a maintenance run on the next write.
const WRITE_BUFFER_THRESHOLD: usize = 128;

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Called after every write. Runs maintenance when the cache is over its
  /// bound, when the write log is long, or by chance, and only if no other
  /// thread is already doing it.
  pub(crate) fn after_write(&self, removals: &mut Removals<K, V>) {
    let Some(maximum) = self.maximum else {
      return;
    };
    let due = self.metrics.current_weight() > maximum
      || self.write_buffer.len() >= WRITE_BUFFER_THRESHOLD
      || self.rng.should_run(self.maintenance_chance);
    if !due {
      return;
    }
    if let Some(_guard) = self.maintenance_lock.try_lock() {
      self.run_maintenance(false, removals);
    }
  }

  /// Runs a full maintenance pass, including the expiry sweep, and waits
  /// for every notification it produced to be delivered.
  pub(crate) fn clean_up(&self) {
    let mut removals = Vec::new();
    {
      let _guard = self.maintenance_lock.lock();
      self.run_maintenance(true, &mut removals);
    }
    self.notify_all(removals);
    if let Some(notifier) = &self.notifier {
      notifier.flush();
    }
  }

  /// Applies buffered reads and writes to the policy and evicts until the
  /// cache is within its bound. Must be called with the maintenance lock
  /// held.
  fn run_maintenance(&self, full: bool, removals: &mut Removals<K, V>) {
    let now = self.now();
    if full && !self.expiration.is_none() {
      self.sweep_expired(now, removals);
    }
    if self.maximum.is_none() {
      return;
    }

    for (key, weight) in self.read_buffer.drain() {
      self.policy.on_access(&key, weight);
    }

    for event in self.write_buffer.drain() {
      match event {
        WriteEvent::Upsert(key, weight) => match self.policy.on_admit(&key, weight) {
          AdmissionDecision::Admit => {}
          AdmissionDecision::Reject => self.evict_key(&key, now, removals),
          AdmissionDecision::AdmitAndEvict(victims) => {
            for victim in victims {
              self.evict_key(&victim, now, removals);
            }
          }
        },
        WriteEvent::Remove(key) => self.policy.on_remove(&key),
      }
    }

    self.evict_to_bound(now, removals);
  }

  fn evict_to_bound(&self, now: u64, removals: &mut Removals<K, V>) {
    let Some(maximum) = self.maximum else {
      return;
    };
    loop {
      let weight = self.metrics.current_weight();
      if weight <= maximum {
        break;
      }
      let (victims, _) = self.policy.evict(weight - maximum);
      if victims.is_empty() {
        tracing::trace!(weight, maximum, "over bound with no eviction candidates");
        break;
      }
      for victim in victims {
        self.evict_key(&victim, now, removals);
      }
    }
  }

  /// Removes a key chosen by the policy.
  fn evict_key(&self, key: &K, now: u64, removals: &mut Removals<K, V>) {
    let removed = {
      let mut shard = self.store.shard(key).write();
      let removed = shard.remove_entry(key);
      if removed.is_some() {
        self.push_remove(key);
      }
      removed
    };
    if let Some((key, entry)) = removed {
      let cause = if entry.is_expired(now) {
        RemovalCause::Expired
      } else {
        RemovalCause::Size
      };
      self.record_removal(&entry, cause);
      tracing::trace!(%cause, weight = entry.weight(), "evicted entry");
      removals.push(Notification::new(key, Some(entry.value()), cause));
    }
  }

  /// Removes every expired entry, one shard at a time.
  fn sweep_expired(&self, now: u64, removals: &mut Removals<K, V>) {
    let before = removals.len();
    for shard in self.store.iter_shards() {
      if !shard.read().values().any(|entry| entry.is_expired(now)) {
        continue;
      }
      let mut guard = shard.write();
      let expired: Vec<K> = guard
        .iter()
        .filter(|(_, entry)| entry.is_expired(now))
        .map(|(key, _)| key.clone())
        .collect();
      for key in expired {
        if let Some((key, entry)) = guard.remove_entry(&key) {
          self.push_remove(&key);
          self.record_removal(&entry, RemovalCause::Expired);
          removals.push(Notification::new(
            key,
            Some(entry.value()),
            RemovalCause::Expired,
          ));
        }
      }
    }
    let swept = removals.len() - before;
    if swept > 0 {
      tracing::debug!(swept, "removed expired entries");
    }
  }
}
