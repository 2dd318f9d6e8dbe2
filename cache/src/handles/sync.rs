use crate::error::LoadError;
use crate::loader::LoadResult;
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;
use crate::time::Clock;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::ops::Deref;
use std::sync::Arc;

use indexmap::IndexMap;

/// A thread-safe, synchronous cache that is filled explicitly.
///
/// Values are handed out as `Arc<V>`; a value stays alive for as long as a
/// caller holds it, even after it leaves the cache.
pub struct Cache<K: Send, V: Send, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K: Send, V: Send, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Send, V: Send, H> fmt::Debug for Cache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache").field("shared", &self.shared).finish()
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the value for `key` if it is cached and live.
  ///
  /// A hit counts as an access for expiry and eviction, and may start a
  /// background reload when refresh is configured.
  pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
    self.shared.get_if_present(key)
  }

  /// Returns the value for `key`, computing it with `f` on this thread if it
  /// is absent.
  ///
  /// Concurrent callers for the same key wait for the first one's result
  /// instead of computing their own. `Ok(None)` from `f` caches nothing.
  pub fn get_with<F>(&self, key: &K, f: F) -> Result<Option<Arc<V>>, LoadError>
  where
    F: FnOnce(&K) -> LoadResult<V>,
  {
    self.shared.get_with(key, f)
  }

  /// Returns the cached values for `keys`, in request order. Absent keys are
  /// left out.
  pub fn get_all_present<I>(&self, keys: I) -> IndexMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.get_all_present(keys)
  }

  /// Stores `value` under `key`, replacing any previous value. A load
  /// already in flight for the key still answers its callers but no longer
  /// lands.
  pub fn put(&self, key: K, value: V) {
    self.shared.put(key, value);
  }

  /// Stores every pair in `entries`.
  pub fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    self.shared.put_all(entries);
  }

  /// Removes `key`. Returns the removed value if it was live.
  ///
  /// A load already in flight for the key still answers its callers, but its
  /// value is not stored.
  pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key)
  }

  /// Removes every key in `keys`.
  pub fn invalidate_keys<'a, I>(&self, keys: I)
  where
    I: IntoIterator<Item = &'a K>,
    K: 'a,
  {
    self.shared.invalidate_keys(keys);
  }

  /// Removes every entry.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// Returns true if `key` has a live entry. Does not count as an access.
  pub fn contains_key(&self, key: &K) -> bool {
    self.shared.contains_key(key)
  }

  /// A copy of every live entry, in no particular order.
  pub fn snapshot(&self) -> Vec<(K, Arc<V>)> {
    self.shared.snapshot()
  }

  /// The number of entries, including any not yet evicted or expired.
  pub fn estimated_size(&self) -> u64 {
    self.shared.estimated_size()
  }

  /// The total weight of the entries, or their number without a weigher.
  pub fn weighted_size(&self) -> u64 {
    self.shared.weighted_size()
  }

  /// Runs pending maintenance now: applies buffered reads and writes to the
  /// eviction policy, evicts down to the bound, and removes expired entries.
  /// Returns once every resulting notification has been delivered.
  pub fn clean_up(&self) {
    self.shared.clean_up();
  }

  /// Returns a snapshot of the cache's current metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The time source the cache runs on.
  pub fn clock(&self) -> Arc<dyn Clock> {
    self.shared.clock.clone()
  }
}

/// A cache that computes missing values with its loader.
///
/// Dereferences to [`Cache`] for the explicit operations.
pub struct LoadingCache<K: Send, V: Send, H = ahash::RandomState> {
  pub(crate) cache: Cache<K, V, H>,
}

impl<K: Send, V: Send, H> Clone for LoadingCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      cache: self.cache.clone(),
    }
  }
}

impl<K: Send, V: Send, H> fmt::Debug for LoadingCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadingCache")
      .field("shared", &self.cache.shared)
      .finish()
  }
}

impl<K: Send, V: Send, H> Deref for LoadingCache<K, V, H> {
  type Target = Cache<K, V, H>;

  fn deref(&self) -> &Self::Target {
    &self.cache
  }
}

impl<K, V, H> LoadingCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the value for `key`, loading it if absent. Blocks until the
  /// load finishes.
  ///
  /// At most one load per key runs at a time; concurrent callers share its
  /// outcome, including a failure. Failures are not cached.
  ///
  /// With an asynchronous loader this blocks on a task running on the
  /// spawner, so it must not be called from a single-threaded runtime.
  pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, LoadError> {
    self.cache.shared.get(key)
  }

  /// Returns the values for `keys` in request order, loading the missing
  /// ones together with the bulk loader if there is one.
  ///
  /// Keys without a value are left out. If any load fails, the first
  /// failure is returned.
  pub fn get_all<I>(&self, keys: I) -> Result<IndexMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    self.cache.shared.get_all(keys)
  }

  /// Reloads `key`.
  ///
  /// A cached entry is reloaded in the background and keeps serving its
  /// current value until the reload lands. An absent key is loaded now.
  pub fn refresh(&self, key: &K) -> Result<(), LoadError> {
    if self.cache.shared.contains_key(key) {
      self.cache.shared.refresh(key);
      return Ok(());
    }
    self.cache.shared.get(key).map(|_| ())
  }
}
