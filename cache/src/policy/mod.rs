pub mod lru;
pub(crate) mod lru_list;
pub mod null;
pub(crate) mod slru;
pub mod tinylfu;

/// The outcome of admitting a newly written key.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmissionDecision<K> {
  Admit,
  /// The written key itself should not stay in the cache.
  Reject,
  /// The written key is admitted, and these keys must leave to make room.
  AdmitAndEvict(Vec<K>),
}

/// A trait for implementing cache admission/eviction policies.
///
/// The policy is responsible for tracking item usage and deciding which items
/// to admit or evict when the cache is over its weight bound. It is fed from
/// buffered events during maintenance, never on the read or write path, and is
/// only ever driven by one thread at a time.
pub trait CachePolicy<K>: Send + Sync {
  /// Called when a key was read.
  fn on_access(&self, key: &K, weight: u64);

  /// Called when a key was written, either for the first time or with a new
  /// value.
  fn on_admit(&self, key: &K, weight: u64) -> AdmissionDecision<K>;

  /// Called when a key left the cache for a reason other than this policy's
  /// own decision. The policy should forget the key.
  fn on_remove(&self, key: &K);

  /// Called when the cache is over its bound.
  ///
  /// The policy must identify and return a set of victim keys to be evicted,
  /// along with their total weight, freeing at least `weight_to_free` if it can.
  /// Victims are forgotten by the policy as they are returned.
  fn evict(&self, weight_to_free: u64) -> (Vec<K>, u64);

  /// Clears all state from the policy.
  fn clear(&self);
}
