use crate::error::LoadError;
use crate::handles::{Cache, LoadingCache};
use crate::loader::{LoadResult, PendingResult};
use crate::metrics::MetricsSnapshot;
use crate::shared::{CacheShared, Slot};

use core::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use futures_util::future;
use indexmap::IndexMap;

/// A thread-safe cache whose loads run as tasks on a spawner.
///
/// Reads never block: they return a [`PendingResult`] that resolves once the
/// value is loaded. Awaiting it is the usual way to read.
pub struct AsyncCache<K: Send, V: Send, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K: Send, V: Send, H> Clone for AsyncCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K: Send, V: Send, H> fmt::Debug for AsyncCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K, V, H> AsyncCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns a blocking view of the same cache.
  pub fn synchronous(&self) -> LoadingCache<K, V, H> {
    LoadingCache {
      cache: Cache {
        shared: self.shared.clone(),
      },
    }
  }

  /// Returns a snapshot of the cache's current metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// Returns the value for `key`, starting a load on the spawner if it is
  /// absent.
  ///
  /// The result is already resolved on a hit. Concurrent callers for a key
  /// that is loading get the same in-flight result.
  pub fn get(&self, key: &K) -> PendingResult<V> {
    self.shared.get_async(key)
  }

  /// Returns the cached value or the in-flight load for `key`, without
  /// starting a load.
  pub fn get_if_present(&self, key: &K) -> Option<PendingResult<V>> {
    self.shared.get_if_present_async(key)
  }

  /// Returns the values for `keys` in request order, loading the missing
  /// ones together when a bulk loader is configured.
  ///
  /// Keys without a value are left out. If any load fails, the first
  /// failure is returned.
  pub async fn get_all<I>(&self, keys: I) -> Result<IndexMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    let (slots, leaders) = self.shared.partition(keys);
    self.shared.load_leaders_async(leaders);

    let mut ready = Vec::with_capacity(slots.len());
    let mut waiting = Vec::new();
    for (key, slot) in slots {
      match slot {
        Slot::Ready(value) => ready.push((key, Some(value))),
        Slot::Waiting(pending) => {
          waiting.push(pending);
          ready.push((key, None));
        }
      }
    }

    let mut outcomes = future::join_all(waiting).await.into_iter();
    let resolved = ready
      .into_iter()
      .map(|(key, value)| match value {
        Some(value) => (key, None, Some(value)),
        None => (key, outcomes.next(), None),
      })
      .collect();
    CacheShared::<K, V, H>::assemble(resolved)
  }

  /// Stores `value` under `key`, replacing any previous value. A load
  /// already in flight for the key no longer lands.
  pub fn put(&self, key: K, value: V) {
    self.shared.put(key, value);
  }

  /// Stores the eventual result of `future` under `key`.
  ///
  /// The future runs on the spawner. Readers of `key` wait for it from now
  /// on; a load that was already in flight for the key no longer lands.
  pub fn put_pending<F>(&self, key: K, future: F) -> PendingResult<V>
  where
    F: Future<Output = LoadResult<V>> + Send + 'static,
  {
    self.shared.put_pending(key, Box::pin(future))
  }

  /// Removes `key`. A load already in flight for it still resolves for its
  /// waiters, but its value is not stored.
  pub fn invalidate(&self, key: &K) -> Option<Arc<V>> {
    self.shared.invalidate(key)
  }

  /// Removes every entry.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// Reloads `key`.
  ///
  /// A cached entry is reloaded in the background and keeps serving its
  /// current value meanwhile; the returned result is already resolved with
  /// that value. An absent key is loaded as by [`get`](Self::get).
  pub fn refresh(&self, key: &K) -> PendingResult<V> {
    match self.shared.get_if_present(key) {
      Some(value) => {
        self.shared.refresh(key);
        PendingResult::resolved(value)
      }
      None => self.shared.get_async(key),
    }
  }

  /// A copy of every live entry, in no particular order.
  pub fn snapshot(&self) -> Vec<(K, Arc<V>)> {
    self.shared.snapshot()
  }

  /// The number of entries, including any not yet evicted or expired.
  pub fn estimated_size(&self) -> u64 {
    self.shared.estimated_size()
  }

  /// Runs pending maintenance now. See [`Cache::clean_up`].
  pub fn clean_up(&self) {
    self.shared.clean_up();
  }
}
