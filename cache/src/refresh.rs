//! Refresh-ahead: reloading an entry in the background while readers keep
//! getting the current value.

use crate::entry::CacheEntry;
use crate::error::LoadError;
use crate::listener::RemovalCause;
use crate::loader::{LoadOutcome, Loader};
use crate::metrics::Metrics;
use crate::shared::{run_sync_load, CacheShared};

use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Starts a reload if `entry` was written longer ago than the refresh
  /// threshold. Called on a hit, after the hit was recorded.
  pub(crate) fn maybe_refresh(self: &Arc<Self>, key: &K, entry: &Arc<CacheEntry<V>>, now: u64) {
    let Some(threshold) = self.refresh_after_write else {
      return;
    };
    if entry.age(now) >= threshold {
      self.begin_refresh(key.clone(), entry.clone());
    }
  }

  /// Reloads `key` in the background. Returns false if a reload of this
  /// entry is already running or there is nothing to reload with.
  pub(crate) fn begin_refresh(self: &Arc<Self>, key: K, entry: Arc<CacheEntry<V>>) -> bool {
    let Some(loader) = self.loader.clone() else {
      return false;
    };
    if !entry.try_begin_refresh() {
      return false;
    }
    Metrics::incr(&self.metrics.refreshes);
    tracing::trace!("reloading entry");

    match loader {
      Loader::Sync(load) => {
        let shared = self.clone();
        self.executor.execute(Box::new(move || {
          let outcome = run_sync_load(|| load(&key));
          shared.complete_refresh(key, &entry, outcome);
        }));
      }
      Loader::Async(load) => {
        let Some(spawner) = self.spawner.clone() else {
          entry.end_refresh();
          return false;
        };
        let shared = self.clone();
        spawner.spawn(Box::pin(async move {
          let request = key.clone();
          let reload = AssertUnwindSafe(async move { load(request).await });
          let outcome = match reload.catch_unwind().await {
            Ok(Ok(value)) => Ok(value.map(Arc::new)),
            Ok(Err(err)) => Err(LoadError::from(err)),
            Err(_) => Err(LoadError::Panicked),
          };
          shared.complete_refresh(key, &entry, outcome);
        }));
      }
    }
    true
  }

  /// Reloads `key` if it is cached. Returns false if it is absent or a
  /// reload is already running.
  pub(crate) fn refresh(self: &Arc<Self>, key: &K) -> bool {
    let now = self.now();
    let mut removals = Vec::new();
    let found = self.lookup(key, now, &mut removals);
    self.notify_all(removals);
    match found {
      Some(entry) => self.begin_refresh(key.clone(), entry),
      None => false,
    }
  }

  /// Applies a reload. The new value only lands if the entry it was started
  /// from is still the one in the store; anything written since wins.
  fn complete_refresh(&self, key: K, entry: &Arc<CacheEntry<V>>, outcome: LoadOutcome<V>) {
    let mut removals = Vec::new();
    match outcome {
      Ok(Some(value)) => {
        Metrics::incr(&self.metrics.load_successes);
        match catch_unwind(AssertUnwindSafe(|| {
          self.replace_if_same(&key, entry, value, &mut removals)
        })) {
          Ok(true) => {}
          Ok(false) => tracing::debug!("entry changed during reload, discarding the reloaded value"),
          Err(_) => tracing::error!("weigher or expiry hook panicked while storing a reloaded value"),
        }
      }
      Ok(None) => {
        Metrics::incr(&self.metrics.load_successes);
        self.remove_if_same(&key, entry, RemovalCause::Explicit, &mut removals);
      }
      Err(err) => {
        Metrics::incr(&self.metrics.load_failures);
        tracing::warn!(error = %err, "reload failed, keeping the current value");
      }
    }
    entry.end_refresh();
    self.after_write(&mut removals);
    self.notify_all(removals);
  }
}
