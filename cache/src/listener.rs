use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
  /// The entry was removed by `invalidate`, `invalidate_all`, or a reload
  /// that produced no value.
  Explicit,
  /// The entry's value was replaced by a newer one for the same key.
  Replaced,
  /// The entry was evicted to keep the cache within its size or weight bound.
  Size,
  /// The entry's lifetime elapsed.
  Expired,
  /// An asynchronous load for the key failed. There is no value.
  Error,
}

impl RemovalCause {
  /// Returns `true` if the removal was decided by the cache rather than
  /// requested by the user.
  pub fn was_evicted(&self) -> bool {
    matches!(self, RemovalCause::Size | RemovalCause::Expired)
  }
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::Explicit => write!(f, "explicitly removed"),
      RemovalCause::Replaced => write!(f, "replaced"),
      RemovalCause::Size => write!(f, "evicted due to size"),
      RemovalCause::Expired => write!(f, "expired"),
      RemovalCause::Error => write!(f, "load failed"),
    }
  }
}

/// A listener that can be registered with the cache to receive notifications
/// when entries are removed.
///
/// It is called exactly once per removal, after the removal is visible in the
/// cache and with no cache lock held. A panic in the listener is caught and
/// logged.
pub trait RemovalListener<K, V>: Send + Sync {
  fn on_removal(&self, key: K, value: Option<Arc<V>>, cause: RemovalCause);
}

impl<K, V, F> RemovalListener<K, V> for F
where
  F: Fn(K, Option<Arc<V>>, RemovalCause) + Send + Sync,
{
  fn on_removal(&self, key: K, value: Option<Arc<V>>, cause: RemovalCause) {
    self(key, value, cause)
  }
}

/// Where removal notifications are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerDelivery {
  /// On the thread that caused the removal, once its locks are released.
  #[default]
  Inline,
  /// On a dedicated notifier thread, in removal order. Removals caused by
  /// the listener itself are delivered on that thread as they happen, ahead
  /// of anything still queued.
  Background,
}
