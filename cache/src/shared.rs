use crate::entry::CacheEntry;
use crate::error::LoadError;
use crate::expiry::Expiration;
use crate::listener::RemovalCause;
use crate::loader::{
  BoxFuture, BulkLoadResult, BulkLoader, LoadOutcome, LoadResult, Loader, PendingResult,
  PendingTable,
};
use crate::metrics::Metrics;
use crate::policy::CachePolicy;
use crate::rng::FastRng;
use crate::runtime::{Executor, TaskSpawner};
use crate::store::ShardedStore;
use crate::task::access_batcher::AccessBatcher;
use crate::task::notifier::{Notification, Notifier};
use crate::task::write_buffer::{WriteBuffer, WriteEvent};
use crate::time::Clock;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::FutureExt;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;
pub(crate) type Removals<K, V> = Vec<Notification<K, V>>;

/// The result of trying to read a key that may need loading.
pub(crate) enum Claim<V> {
  /// A live entry was found.
  Present(Arc<CacheEntry<V>>),
  /// Another caller is already loading the key.
  Follower(PendingResult<V>),
  /// The caller must load the key and complete this result.
  Leader(PendingResult<V>),
}

/// A requested key during a bulk read.
pub(crate) enum Slot<V> {
  Ready(Arc<V>),
  Waiting(PendingResult<V>),
}

/// Runs a synchronous loader, containing panics.
pub(crate) fn run_sync_load<V>(load: impl FnOnce() -> LoadResult<V>) -> LoadOutcome<V> {
  match catch_unwind(AssertUnwindSafe(load)) {
    Ok(Ok(value)) => Ok(value.map(Arc::new)),
    Ok(Err(err)) => Err(LoadError::from(err)),
    Err(_) => Err(LoadError::Panicked),
  }
}

/// Everything a cache handle shares: the store, the policy machinery, and the
/// loading configuration.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) pending: PendingTable<K, V, H>,
  pub(crate) metrics: Metrics,
  pub(crate) policy: Arc<dyn CachePolicy<K>>,
  pub(crate) read_buffer: AccessBatcher<K>,
  pub(crate) write_buffer: WriteBuffer<K>,
  pub(crate) maintenance_lock: Mutex<()>,
  pub(crate) rng: FastRng,
  pub(crate) maintenance_chance: u32,
  /// The size or weight bound. `None` for unbounded caches.
  pub(crate) maximum: Option<u64>,
  pub(crate) weigher: Option<Weigher<K, V>>,
  pub(crate) expiration: Expiration<K, V>,
  /// Age in nanoseconds after which a read triggers a reload.
  pub(crate) refresh_after_write: Option<u64>,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) notifier: Option<Notifier<K, V>>,
  pub(crate) loader: Option<Loader<K, V>>,
  pub(crate) bulk_loader: Option<BulkLoader<K, V>>,
  pub(crate) executor: Arc<dyn Executor>,
  pub(crate) spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("store", &self.store)
      .field("maximum", &self.maximum)
      .field("expiration", &self.expiration)
      .field("refresh_after_write", &self.refresh_after_write)
      .field("has_listener", &self.notifier.is_some())
      .field("has_loader", &self.loader.is_some())
      .finish_non_exhaustive()
  }
}

/// Completes the results it holds with a failure if it is dropped before
/// they were taken, so that waiters are released when a load task is
/// abandoned by its runtime.
struct LoadGuard<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  shared: Arc<CacheShared<K, V, H>>,
  pending: Vec<(K, PendingResult<V>)>,
}

impl<K, V, H> LoadGuard<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn take(&mut self) -> Vec<(K, PendingResult<V>)> {
    std::mem::take(&mut self.pending)
  }
}

impl<K, V, H> Drop for LoadGuard<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn drop(&mut self) {
    for (key, pending) in self.pending.drain(..) {
      tracing::warn!("a load task was dropped before it finished");
      self
        .shared
        .complete_load(key, &pending, Err(LoadError::Panicked), true);
    }
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  #[inline]
  pub(crate) fn now(&self) -> u64 {
    self.clock.now()
  }

  #[inline]
  fn is_bounded(&self) -> bool {
    self.maximum.is_some()
  }

  fn weigh(&self, key: &K, value: &V) -> u32 {
    self.weigher.as_ref().map_or(1, |weigher| weigher(key, value))
  }

  /// Delivers notifications collected while locks were held.
  pub(crate) fn notify_all(&self, removals: Removals<K, V>) {
    if let Some(notifier) = &self.notifier {
      for notification in removals {
        notifier.notify(notification);
      }
    }
  }

  /// Logs a removal for the policy. Must be called with the key's shard
  /// write lock held.
  pub(crate) fn push_remove(&self, key: &K) {
    if self.is_bounded() {
      self.write_buffer.push(WriteEvent::Remove(key.clone()));
    }
  }

  /// Accounts for an entry that left the store.
  pub(crate) fn record_removal(&self, entry: &CacheEntry<V>, cause: RemovalCause) {
    self.metrics.entry_removed(entry.weight());
    match cause {
      RemovalCause::Explicit => Metrics::incr(&self.metrics.invalidations),
      RemovalCause::Size => Metrics::incr(&self.metrics.evicted_by_size),
      RemovalCause::Expired => Metrics::incr(&self.metrics.evicted_by_expiry),
      RemovalCause::Replaced | RemovalCause::Error => {}
    }
  }

  // --- Reads ---

  /// Returns the live entry for `key`. An expired entry is removed with
  /// `Expired` and reported as absent.
  pub(crate) fn lookup(
    &self,
    key: &K,
    now: u64,
    removals: &mut Removals<K, V>,
  ) -> Option<Arc<CacheEntry<V>>> {
    {
      let shard = self.store.shard(key).read();
      match shard.get(key) {
        None => return None,
        Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
        Some(_) => {}
      }
    }
    self.expire_if_stale(key, now, removals);
    None
  }

  fn expire_if_stale(&self, key: &K, now: u64, removals: &mut Removals<K, V>) {
    let removed = {
      let mut shard = self.store.shard(key).write();
      match shard.get(key) {
        Some(entry) if entry.is_expired(now) => {
          let removed = shard.remove_entry(key);
          self.push_remove(key);
          removed
        }
        _ => None,
      }
    };
    if let Some((key, entry)) = removed {
      self.record_removal(&entry, RemovalCause::Expired);
      removals.push(Notification::new(
        key,
        Some(entry.value()),
        RemovalCause::Expired,
      ));
    }
  }

  /// Bookkeeping for a read that found `entry`.
  pub(crate) fn record_hit(&self, key: &K, entry: &CacheEntry<V>, now: u64) {
    entry.touch(now);
    if let Some(deadline) =
      self
        .expiration
        .on_read(key, entry.value_ref(), now, entry.remaining(now))
    {
      match self.expiration {
        Expiration::AfterAccess(_) => entry.extend_expires_at(deadline),
        _ => entry.set_expires_at(deadline),
      }
    }
    Metrics::incr(&self.metrics.hits);
    if self.is_bounded() {
      self
        .read_buffer
        .record_access(key, u64::from(entry.weight()), self.store.hasher());
    }
  }

  pub(crate) fn get_if_present(self: &Arc<Self>, key: &K) -> Option<Arc<V>> {
    let now = self.now();
    let mut removals = Vec::new();
    let found = self.lookup(key, now, &mut removals);
    self.notify_all(removals);

    match found {
      Some(entry) => {
        self.record_hit(key, &entry, now);
        let value = entry.value();
        self.maybe_refresh(key, &entry, now);
        Some(value)
      }
      None => {
        Metrics::incr(&self.metrics.misses);
        None
      }
    }
  }

  /// Reads many keys without loading. Absent keys are left out.
  pub(crate) fn get_all_present<I>(self: &Arc<Self>, keys: I) -> IndexMap<K, Arc<V>>
  where
    I: IntoIterator<Item = K>,
  {
    let mut found = IndexMap::new();
    for key in keys {
      if found.contains_key(&key) {
        continue;
      }
      if let Some(value) = self.get_if_present(&key) {
        found.insert(key, value);
      }
    }
    found
  }

  /// Checks for a live entry without touching it.
  pub(crate) fn contains_key(&self, key: &K) -> bool {
    let now = self.now();
    self
      .store
      .shard(key)
      .read()
      .get(key)
      .is_some_and(|entry| !entry.is_expired(now))
  }

  /// All live entries, shard by shard.
  pub(crate) fn snapshot(&self) -> Vec<(K, Arc<V>)> {
    let now = self.now();
    let mut entries = Vec::with_capacity(self.metrics.entry_count() as usize);
    for shard in self.store.iter_shards() {
      let guard = shard.read();
      entries.extend(
        guard
          .iter()
          .filter(|(_, entry)| !entry.is_expired(now))
          .map(|(key, entry)| (key.clone(), entry.value())),
      );
    }
    entries
  }

  // --- Writes ---

  /// Stores `value` under `key` in a locked shard, reporting the entry it
  /// displaces.
  fn install(
    &self,
    shard: &mut HashMap<K, Arc<CacheEntry<V>>, H>,
    key: K,
    value: Arc<V>,
    now: u64,
    removals: &mut Removals<K, V>,
  ) {
    let weight = self.weigh(&key, &value);
    let expires_at = match shard.get(&key) {
      Some(old) if !old.is_expired(now) => {
        self
          .expiration
          .on_update(&key, &value, now, old.remaining(now))
      }
      _ => self.expiration.on_create(&key, &value, now),
    };

    let entry = Arc::new(CacheEntry::new(value, weight, now, expires_at));
    self.metrics.entry_added(weight);
    if self.is_bounded() {
      self
        .write_buffer
        .push(WriteEvent::Upsert(key.clone(), u64::from(weight)));
    }

    match shard.insert(key.clone(), entry) {
      Some(old) => {
        let cause = if old.is_expired(now) {
          Metrics::incr(&self.metrics.inserts);
          RemovalCause::Expired
        } else {
          Metrics::incr(&self.metrics.replacements);
          RemovalCause::Replaced
        };
        self.record_removal(&old, cause);
        removals.push(Notification::new(key, Some(old.value()), cause));
      }
      None => Metrics::incr(&self.metrics.inserts),
    }
  }

  pub(crate) fn insert(&self, key: K, value: Arc<V>, removals: &mut Removals<K, V>) {
    let now = self.now();
    let mut shard = self.store.shard(&key).write();
    self.install(&mut shard, key, value, now, removals);
  }

  /// Stores a caller's value. A load in flight for the key is detached
  /// first, so its result still reaches its waiters but is never stored over
  /// this value.
  fn write(&self, key: K, value: Arc<V>, removals: &mut Removals<K, V>) {
    let mut table = self.pending.shard(&key).lock();
    table.remove(&key);
    self.insert(key, value, removals);
  }

  pub(crate) fn put(&self, key: K, value: V) {
    let mut removals = Vec::new();
    self.write(key, Arc::new(value), &mut removals);
    self.after_write(&mut removals);
    self.notify_all(removals);
  }

  pub(crate) fn put_all<I>(&self, entries: I)
  where
    I: IntoIterator<Item = (K, V)>,
  {
    let mut removals = Vec::new();
    for (key, value) in entries {
      self.write(key, Arc::new(value), &mut removals);
      self.after_write(&mut removals);
    }
    self.notify_all(removals);
  }

  /// Replaces the entry for `key` only if it is still `expected`.
  pub(crate) fn replace_if_same(
    &self,
    key: &K,
    expected: &Arc<CacheEntry<V>>,
    value: Arc<V>,
    removals: &mut Removals<K, V>,
  ) -> bool {
    let now = self.now();
    let mut shard = self.store.shard(key).write();
    match shard.get(key) {
      Some(current) if Arc::ptr_eq(current, expected) => {
        self.install(&mut shard, key.clone(), value, now, removals);
        true
      }
      _ => false,
    }
  }

  /// Removes the entry for `key`, detaching any load in flight for it.
  /// Returns the entry's value if it was live.
  pub(crate) fn remove(&self, key: &K, removals: &mut Removals<K, V>) -> Option<Arc<V>> {
    let now = self.now();
    let (key, entry) = {
      let mut table = self.pending.shard(key).lock();
      table.remove(key);
      let mut shard = self.store.shard(key).write();
      let removed = shard.remove_entry(key)?;
      self.push_remove(key);
      removed
    };
    let cause = if entry.is_expired(now) {
      RemovalCause::Expired
    } else {
      RemovalCause::Explicit
    };
    self.record_removal(&entry, cause);
    let value = entry.value();
    removals.push(Notification::new(key, Some(value.clone()), cause));
    (cause == RemovalCause::Explicit).then_some(value)
  }

  /// Removes the entry for `key` only if it is still `expected`.
  pub(crate) fn remove_if_same(
    &self,
    key: &K,
    expected: &Arc<CacheEntry<V>>,
    cause: RemovalCause,
    removals: &mut Removals<K, V>,
  ) -> bool {
    let now = self.now();
    let removed = {
      let mut shard = self.store.shard(key).write();
      match shard.get(key) {
        Some(current) if Arc::ptr_eq(current, expected) => {
          let removed = shard.remove_entry(key);
          self.push_remove(key);
          removed
        }
        _ => None,
      }
    };
    match removed {
      Some((key, entry)) => {
        let cause = if entry.is_expired(now) {
          RemovalCause::Expired
        } else {
          cause
        };
        self.record_removal(&entry, cause);
        removals.push(Notification::new(key, Some(entry.value()), cause));
        true
      }
      None => false,
    }
  }

  pub(crate) fn invalidate(&self, key: &K) -> Option<Arc<V>> {
    let mut removals = Vec::new();
    let value = self.remove(key, &mut removals);
    self.notify_all(removals);
    value
  }

  pub(crate) fn invalidate_keys<'a, I>(&self, keys: I)
  where
    I: IntoIterator<Item = &'a K>,
    K: 'a,
  {
    let mut removals = Vec::new();
    for key in keys {
      self.remove(key, &mut removals);
    }
    self.notify_all(removals);
  }

  /// Removes every entry. Loads in flight keep running for their waiters
  /// but no longer store their results.
  pub(crate) fn invalidate_all(&self) {
    let now = self.now();
    let mut removals = Vec::new();
    for table in self.pending.iter_shards() {
      table.lock().clear();
    }
    {
      let _maintenance = self.maintenance_lock.lock();
      // With every shard locked no write can slip between clearing the
      // policy and emptying the store.
      let mut shards: Vec<_> = self.store.iter_shards().map(|shard| shard.write()).collect();
      self.read_buffer.drain();
      self.write_buffer.drain();
      self.policy.clear();

      for shard in shards.iter_mut() {
        for (key, entry) in shard.drain() {
          let cause = if entry.is_expired(now) {
            RemovalCause::Expired
          } else {
            RemovalCause::Explicit
          };
          self.record_removal(&entry, cause);
          removals.push(Notification::new(key, Some(entry.value()), cause));
        }
      }
    }
    tracing::debug!(removed = removals.len(), "invalidated all entries");
    self.notify_all(removals);
  }

  // --- Loads ---

  /// Joins an in-flight load for `key` or registers the caller as its
  /// loader. The store is re-checked under the pending lock so a load that
  /// finished in between is seen as a hit.
  fn join_or_lead(&self, key: &K, now: u64, removals: &mut Removals<K, V>) -> Claim<V> {
    let mut pending = self.pending.shard(key).lock();
    if let Some(existing) = pending.get(key) {
      return Claim::Follower(existing.clone());
    }
    if let Some(entry) = self.lookup(key, now, removals) {
      return Claim::Present(entry);
    }
    let leader = PendingResult::new();
    pending.insert(key.clone(), leader.clone());
    Claim::Leader(leader)
  }

  /// Reads `key`, deciding who loads it on a miss. Hits are recorded (and may
  /// start a refresh), misses are counted.
  pub(crate) fn claim(self: &Arc<Self>, key: &K) -> Claim<V> {
    let now = self.now();
    let mut removals = Vec::new();
    let claim = match self.lookup(key, now, &mut removals) {
      Some(entry) => Claim::Present(entry),
      None => self.join_or_lead(key, now, &mut removals),
    };
    self.notify_all(removals);

    match &claim {
      Claim::Present(entry) => {
        self.record_hit(key, entry, now);
        self.maybe_refresh(key, entry, now);
      }
      Claim::Follower(_) | Claim::Leader(_) => Metrics::incr(&self.metrics.misses),
    }
    claim
  }

  /// Publishes the outcome of a load: stores a value if this load is still
  /// the registered one, then releases every waiter.
  pub(crate) fn complete_load(
    &self,
    key: K,
    pending: &PendingResult<V>,
    outcome: LoadOutcome<V>,
    notify_error: bool,
  ) -> LoadOutcome<V> {
    let mut outcome = outcome;
    let mut removals = Vec::new();
    let mut current = false;
    {
      let mut table = self.pending.shard(&key).lock();
      if table.get(&key).is_some_and(|p| p.ptr_eq(pending)) {
        current = true;
        table.remove(&key);
        if let Ok(Some(value)) = &outcome {
          // The weigher and expiry hooks run here. A panic in them must not
          // leave the waiters parked.
          let stored = catch_unwind(AssertUnwindSafe(|| {
            self.insert(key.clone(), value.clone(), &mut removals)
          }));
          if stored.is_err() {
            tracing::error!("weigher or expiry hook panicked while storing a loaded value");
            outcome = Err(LoadError::Panicked);
          }
        }
      }
    }

    match &outcome {
      Ok(_) => Metrics::incr(&self.metrics.load_successes),
      Err(err) => {
        Metrics::incr(&self.metrics.load_failures);
        tracing::debug!(error = %err, "load failed");
      }
    }
    pending.complete(outcome.clone());

    if current {
      match &outcome {
        Ok(Some(_)) => self.after_write(&mut removals),
        Err(_) if notify_error => {
          removals.push(Notification::new(key, None, RemovalCause::Error));
        }
        _ => {}
      }
    }
    self.notify_all(removals);
    outcome
  }

  /// Reads `key`, computing it with `load` on the calling thread if absent.
  pub(crate) fn get_with<F>(self: &Arc<Self>, key: &K, load: F) -> LoadOutcome<V>
  where
    F: FnOnce(&K) -> LoadResult<V>,
  {
    match self.claim(key) {
      Claim::Present(entry) => Ok(Some(entry.value())),
      Claim::Follower(pending) => pending.wait(),
      Claim::Leader(pending) => {
        let outcome = run_sync_load(|| load(key));
        self.complete_load(key.clone(), &pending, outcome, false)
      }
    }
  }

  /// Reads `key` through the configured loader, blocking until it is loaded.
  pub(crate) fn get(self: &Arc<Self>, key: &K) -> LoadOutcome<V> {
    match self.loader.clone() {
      Some(Loader::Sync(load)) => self.get_with(key, |k| load(k)),
      Some(Loader::Async(_)) => self.get_async(key).wait(),
      None => Err(LoadError::MissingLoader),
    }
  }

  /// Reads `key` through the configured loader without blocking.
  pub(crate) fn get_async(self: &Arc<Self>, key: &K) -> PendingResult<V> {
    match self.claim(key) {
      Claim::Present(entry) => PendingResult::resolved(entry.value()),
      Claim::Follower(pending) => pending,
      Claim::Leader(pending) => {
        self.spawn_load(key.clone(), pending.clone());
        pending
      }
    }
  }

  /// Returns the value or the in-flight load for `key`, without loading.
  pub(crate) fn get_if_present_async(self: &Arc<Self>, key: &K) -> Option<PendingResult<V>> {
    if let Some(value) = self.get_if_present(key) {
      return Some(PendingResult::resolved(value));
    }
    self.pending.get(key)
  }

  /// Registers `load` as the pending value of `key`, superseding any load
  /// already in flight for it.
  pub(crate) fn put_pending(
    self: &Arc<Self>,
    key: K,
    load: BoxFuture<'static, LoadResult<V>>,
  ) -> PendingResult<V> {
    let pending = PendingResult::new();
    self
      .pending
      .shard(&key)
      .lock()
      .insert(key.clone(), pending.clone());
    self.spawn_single(key, pending.clone(), load);
    pending
  }

  fn spawn_load(self: &Arc<Self>, key: K, pending: PendingResult<V>) {
    let load: BoxFuture<'static, LoadResult<V>> = match self.loader.clone() {
      Some(Loader::Async(load)) => {
        let k = key.clone();
        Box::pin(async move { load(k).await })
      }
      Some(Loader::Sync(load)) => {
        let k = key.clone();
        Box::pin(async move { load(&k) })
      }
      None => {
        self.complete_load(key, &pending, Err(LoadError::MissingLoader), false);
        return;
      }
    };
    self.spawn_single(key, pending, load);
  }

  fn spawner(&self) -> Option<Arc<dyn TaskSpawner>> {
    let spawner = self.spawner.clone();
    if spawner.is_none() {
      tracing::error!("an asynchronous load was requested but no task spawner is configured");
    }
    spawner
  }

  fn spawn_single(
    self: &Arc<Self>,
    key: K,
    pending: PendingResult<V>,
    load: BoxFuture<'static, LoadResult<V>>,
  ) {
    let Some(spawner) = self.spawner() else {
      self.complete_load(key, &pending, Err(LoadError::MissingLoader), true);
      return;
    };
    let mut guard = LoadGuard {
      shared: self.clone(),
      pending: vec![(key, pending)],
    };
    spawner.spawn(Box::pin(async move {
      let outcome = match AssertUnwindSafe(load).catch_unwind().await {
        Ok(Ok(value)) => Ok(value.map(Arc::new)),
        Ok(Err(err)) => Err(LoadError::from(err)),
        Err(_) => Err(LoadError::Panicked),
      };
      for (key, pending) in guard.take() {
        guard
          .shared
          .complete_load(key, &pending, outcome.clone(), true);
      }
    }));
  }

  // --- Bulk loads ---

  /// Resolves every requested key to a ready value or a result to wait on,
  /// and returns the keys this caller must load.
  pub(crate) fn partition<I>(
    self: &Arc<Self>,
    keys: I,
  ) -> (Vec<(K, Slot<V>)>, Vec<(K, PendingResult<V>)>)
  where
    I: IntoIterator<Item = K>,
  {
    let keys: IndexSet<K> = keys.into_iter().collect();
    let mut slots = Vec::with_capacity(keys.len());
    let mut leaders = Vec::new();
    for key in keys {
      let slot = match self.claim(&key) {
        Claim::Present(entry) => Slot::Ready(entry.value()),
        Claim::Follower(pending) => Slot::Waiting(pending),
        Claim::Leader(pending) => {
          leaders.push((key.clone(), pending.clone()));
          Slot::Waiting(pending)
        }
      };
      slots.push((key, slot));
    }
    (slots, leaders)
  }

  /// Assembles bulk results in request order. Keys without a value are left
  /// out; the first failure wins.
  pub(crate) fn assemble(
    slots: Vec<(K, Option<LoadOutcome<V>>, Option<Arc<V>>)>,
  ) -> Result<IndexMap<K, Arc<V>>, LoadError> {
    let mut result = IndexMap::with_capacity(slots.len());
    let mut first_error = None;
    for (key, outcome, ready) in slots {
      let value = match (ready, outcome) {
        (Some(value), _) => Some(value),
        (None, Some(Ok(value))) => value,
        (None, Some(Err(err))) => {
          first_error.get_or_insert(err);
          None
        }
        (None, None) => None,
      };
      if let Some(value) = value {
        result.insert(key, value);
      }
    }
    match first_error {
      Some(err) => Err(err),
      None => Ok(result),
    }
  }

  /// Hands out each leader's share of a bulk result.
  fn complete_bulk(
    &self,
    leaders: Vec<(K, PendingResult<V>)>,
    outcome: Result<HashMap<K, V>, LoadError>,
    notify_error: bool,
  ) {
    match outcome {
      Ok(mut values) => {
        for (key, pending) in leaders {
          let value = values.remove(&key).map(Arc::new);
          self.complete_load(key, &pending, Ok(value), notify_error);
        }
        if !values.is_empty() {
          tracing::debug!(ignored = values.len(), "bulk loader returned unrequested keys");
        }
      }
      Err(err) => {
        for (key, pending) in leaders {
          self.complete_load(key, &pending, Err(err.clone()), notify_error);
        }
      }
    }
  }

  /// Loads `leaders` for a blocking caller. Synchronous loaders run on this
  /// thread; asynchronous ones are spawned and awaited through the results.
  pub(crate) fn load_leaders_blocking(self: &Arc<Self>, leaders: Vec<(K, PendingResult<V>)>) {
    if leaders.is_empty() {
      return;
    }
    match (self.bulk_loader.clone(), self.loader.clone()) {
      (Some(BulkLoader::Sync(load_all)), _) => {
        let keys: Vec<K> = leaders.iter().map(|(key, _)| key.clone()).collect();
        tracing::debug!(keys = keys.len(), "bulk loading");
        let outcome = match catch_unwind(AssertUnwindSafe(|| load_all(&keys))) {
          Ok(Ok(values)) => Ok(values),
          Ok(Err(err)) => Err(LoadError::from(err)),
          Err(_) => Err(LoadError::Panicked),
        };
        self.complete_bulk(leaders, outcome, false);
      }
      (Some(BulkLoader::Async(_)), _) => self.spawn_bulk_load(leaders),
      (None, Some(Loader::Sync(load))) => {
        for (key, pending) in leaders {
          let outcome = run_sync_load(|| load(&key));
          self.complete_load(key, &pending, outcome, false);
        }
      }
      (None, Some(Loader::Async(_))) => {
        for (key, pending) in leaders {
          self.spawn_load(key, pending);
        }
      }
      (None, None) => {
        for (key, pending) in leaders {
          self.complete_load(key, &pending, Err(LoadError::MissingLoader), false);
        }
      }
    }
  }

  /// Loads `leaders` without blocking. Every loader kind runs on the spawner.
  pub(crate) fn load_leaders_async(self: &Arc<Self>, leaders: Vec<(K, PendingResult<V>)>) {
    if leaders.is_empty() {
      return;
    }
    if self.bulk_loader.is_some() {
      self.spawn_bulk_load(leaders);
    } else {
      for (key, pending) in leaders {
        self.spawn_load(key, pending);
      }
    }
  }

  fn spawn_bulk_load(self: &Arc<Self>, leaders: Vec<(K, PendingResult<V>)>) {
    let keys: Vec<K> = leaders.iter().map(|(key, _)| key.clone()).collect();
    let load: BoxFuture<'static, BulkLoadResult<K, V>> = match self.bulk_loader.clone() {
      Some(BulkLoader::Async(load_all)) => Box::pin(async move { load_all(keys).await }),
      Some(BulkLoader::Sync(load_all)) => Box::pin(async move { load_all(&keys) }),
      None => {
        for (key, pending) in leaders {
          self.spawn_load(key, pending);
        }
        return;
      }
    };
    let Some(spawner) = self.spawner() else {
      self.complete_bulk(leaders, Err(LoadError::MissingLoader), true);
      return;
    };

    let mut guard = LoadGuard {
      shared: self.clone(),
      pending: leaders,
    };
    spawner.spawn(Box::pin(async move {
      let outcome = match AssertUnwindSafe(load).catch_unwind().await {
        Ok(Ok(values)) => Ok(values),
        Ok(Err(err)) => Err(LoadError::from(err)),
        Err(_) => Err(LoadError::Panicked),
      };
      let leaders = guard.take();
      guard.shared.complete_bulk(leaders, outcome, true);
    }));
  }

  pub(crate) fn get_all<I>(self: &Arc<Self>, keys: I) -> Result<IndexMap<K, Arc<V>>, LoadError>
  where
    I: IntoIterator<Item = K>,
  {
    let (slots, leaders) = self.partition(keys);
    self.load_leaders_blocking(leaders);
    let resolved = slots
      .into_iter()
      .map(|(key, slot)| match slot {
        Slot::Ready(value) => (key, None, Some(value)),
        Slot::Waiting(pending) => (key, Some(pending.wait()), None),
      })
      .collect();
    Self::assemble(resolved)
  }

  pub(crate) fn estimated_size(&self) -> u64 {
    self.metrics.entry_count()
  }

  pub(crate) fn weighted_size(&self) -> u64 {
    self.metrics.current_weight()
  }
}
