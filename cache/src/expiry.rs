use crate::entry::NO_EXPIRY;
use crate::time::deadline;

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Computes per-entry lifetimes.
///
/// Each hook returns the time the entry has left to live, measured from
/// `current_time`. Returning [`Duration::ZERO`] makes the entry expire on its
/// next check. The update and read hooks receive the lifetime the entry had
/// left before the operation and return it unchanged by default.
///
/// Hooks run on the thread performing the cache operation, sometimes while a
/// shard lock is held. They must be quick and must not call back into the
/// cache.
pub trait Expiry<K, V>: Send + Sync {
  /// Lifetime of a newly created entry.
  fn expire_after_create(&self, key: &K, value: &V, current_time: u64) -> Duration;

  /// Lifetime of an entry whose value was just replaced.
  fn expire_after_update(
    &self,
    key: &K,
    value: &V,
    current_time: u64,
    current_duration: Duration,
  ) -> Duration {
    let _ = (key, value, current_time);
    current_duration
  }

  /// Lifetime of an entry that was just read.
  fn expire_after_read(
    &self,
    key: &K,
    value: &V,
    current_time: u64,
    current_duration: Duration,
  ) -> Duration {
    let _ = (key, value, current_time);
    current_duration
  }
}

/// How entries in a cache expire.
pub enum Expiration<K, V> {
  /// Entries never expire.
  None,
  /// Entries expire a fixed time after their last read or write.
  AfterAccess(Duration),
  /// Entries expire a fixed time after their last write.
  AfterWrite(Duration),
  /// Entries expire after a lifetime computed by an [`Expiry`].
  Variable(Arc<dyn Expiry<K, V>>),
}

impl<K, V> Clone for Expiration<K, V> {
  fn clone(&self) -> Self {
    match self {
      Expiration::None => Expiration::None,
      Expiration::AfterAccess(d) => Expiration::AfterAccess(*d),
      Expiration::AfterWrite(d) => Expiration::AfterWrite(*d),
      Expiration::Variable(e) => Expiration::Variable(e.clone()),
    }
  }
}

impl<K, V> fmt::Debug for Expiration<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expiration::None => f.write_str("None"),
      Expiration::AfterAccess(d) => f.debug_tuple("AfterAccess").field(d).finish(),
      Expiration::AfterWrite(d) => f.debug_tuple("AfterWrite").field(d).finish(),
      Expiration::Variable(_) => f.write_str("Variable(..)"),
    }
  }
}

impl<K, V> Expiration<K, V> {
  #[inline]
  pub(crate) fn is_none(&self) -> bool {
    matches!(self, Expiration::None)
  }

  /// Deadline of an entry created at `now`.
  pub(crate) fn on_create(&self, key: &K, value: &V, now: u64) -> u64 {
    match self {
      Expiration::None => NO_EXPIRY,
      Expiration::AfterAccess(d) | Expiration::AfterWrite(d) => deadline(now, *d),
      Expiration::Variable(expiry) => deadline(now, expiry.expire_after_create(key, value, now)),
    }
  }

  /// Deadline of an entry whose value was replaced at `now`. `remaining` is
  /// what the previous value had left.
  pub(crate) fn on_update(&self, key: &K, value: &V, now: u64, remaining: Duration) -> u64 {
    match self {
      Expiration::None => NO_EXPIRY,
      Expiration::AfterAccess(d) | Expiration::AfterWrite(d) => deadline(now, *d),
      Expiration::Variable(expiry) => {
        deadline(now, expiry.expire_after_update(key, value, now, remaining))
      }
    }
  }

  /// New deadline of an entry read at `now`, or `None` if reads do not move it.
  pub(crate) fn on_read(&self, key: &K, value: &V, now: u64, remaining: Duration) -> Option<u64> {
    match self {
      Expiration::None | Expiration::AfterWrite(_) => None,
      Expiration::AfterAccess(d) => Some(deadline(now, *d)),
      Expiration::Variable(expiry) => {
        let next = expiry.expire_after_read(key, value, now, remaining);
        if next == remaining {
          None
        } else {
          Some(deadline(now, next))
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SECOND: u64 = 1_000_000_000;

  struct ByValue;

  impl Expiry<&'static str, u64> for ByValue {
    fn expire_after_create(&self, _key: &&'static str, value: &u64, _now: u64) -> Duration {
      Duration::from_secs(*value)
    }

    fn expire_after_read(
      &self,
      _key: &&'static str,
      _value: &u64,
      _now: u64,
      current_duration: Duration,
    ) -> Duration {
      current_duration + Duration::from_secs(1)
    }
  }

  #[test]
  fn fixed_modes_reset_on_the_right_operations() {
    let access: Expiration<u32, u32> = Expiration::AfterAccess(Duration::from_secs(5));
    let write: Expiration<u32, u32> = Expiration::AfterWrite(Duration::from_secs(5));

    assert_eq!(access.on_create(&1, &1, 0), 5 * SECOND);
    assert_eq!(write.on_create(&1, &1, 0), 5 * SECOND);

    assert_eq!(
      access.on_read(&1, &1, 4 * SECOND, Duration::from_secs(1)),
      Some(9 * SECOND)
    );
    assert_eq!(write.on_read(&1, &1, 4 * SECOND, Duration::from_secs(1)), None);

    assert_eq!(
      write.on_update(&1, &1, 4 * SECOND, Duration::from_secs(1)),
      9 * SECOND
    );
  }

  #[test]
  fn no_expiration_never_sets_a_deadline() {
    let none: Expiration<u32, u32> = Expiration::None;
    assert_eq!(none.on_create(&1, &1, 10), NO_EXPIRY);
    assert_eq!(none.on_update(&1, &1, 10, Duration::MAX), NO_EXPIRY);
    assert_eq!(none.on_read(&1, &1, 10, Duration::MAX), None);
  }

  #[test]
  fn variable_expiry_consults_hooks() {
    let variable: Expiration<&'static str, u64> = Expiration::Variable(Arc::new(ByValue));
    assert_eq!(variable.on_create(&"k", &3, SECOND), 4 * SECOND);
    // Update falls back to the default hook and keeps the remaining lifetime.
    assert_eq!(
      variable.on_update(&"k", &3, 2 * SECOND, Duration::from_secs(2)),
      4 * SECOND
    );
    // Read extends by one second.
    assert_eq!(
      variable.on_read(&"k", &3, 2 * SECOND, Duration::from_secs(2)),
      Some(5 * SECOND)
    );
  }
}
