pub mod maintenance_frequency;

use crate::error::BuildError;
use crate::expiry::{Expiration, Expiry};
use crate::handles::{AsyncCache, Cache, LoadingCache};
use crate::listener::{ListenerDelivery, RemovalListener};
use crate::loader::{BoxFuture, BulkLoadResult, BulkLoader, LoadResult, Loader, PendingTable};
use crate::metrics::Metrics;
use crate::policy::null::NullPolicy;
use crate::policy::tinylfu::TinyLfuPolicy;
use crate::policy::CachePolicy;
use crate::rng::FastRng;
use crate::runtime::{Executor, TaskSpawner, ThreadExecutor};
use crate::shared::{CacheShared, Weigher};
use crate::store::ShardedStore;
use crate::task::access_batcher::AccessBatcher;
use crate::task::notifier::Notifier;
use crate::task::write_buffer::WriteBuffer;
use crate::time::{duration_to_nanos, Clock, SystemClock};

use core::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Which handle a build produces. Each one has its own requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
  Manual,
  Loading,
  Async,
}

/// A builder for creating `Cache`, `LoadingCache` and `AsyncCache` instances.
///
/// ```
/// use ferro_cache::CacheBuilder;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::<String, u64>::new()
///   .maximum_size(10_000)
///   .expire_after_write(Duration::from_secs(60))
///   .build()
///   .unwrap();
///
/// cache.put("answer".to_string(), 42);
/// assert_eq!(cache.get_if_present(&"answer".to_string()).as_deref(), Some(&42));
/// ```
pub struct CacheBuilder<K: Send, V: Send, H = ahash::RandomState> {
  maximum_size: Option<u64>,
  maximum_weight: Option<u64>,
  weigher: Option<Weigher<K, V>>,
  expire_after_access: Option<Duration>,
  expire_after_write: Option<Duration>,
  expiry: Option<Arc<dyn Expiry<K, V>>>,
  refresh_after_write: Option<Duration>,
  listener: Option<Arc<dyn RemovalListener<K, V>>>,
  listener_delivery: ListenerDelivery,
  clock: Option<Arc<dyn Clock>>,
  loader: Option<Loader<K, V>>,
  bulk_loader: Option<BulkLoader<K, V>>,
  executor: Option<Arc<dyn Executor>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
  cache_policy: Option<Arc<dyn CachePolicy<K>>>,
  shards: usize,
  maintenance_chance: u32,
  hasher: H,
  _key_marker: PhantomData<K>,
  _value_marker: PhantomData<V>,
}

impl<K: Send, V: Send, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("maximum_size", &self.maximum_size)
      .field("maximum_weight", &self.maximum_weight)
      .field("expire_after_access", &self.expire_after_access)
      .field("expire_after_write", &self.expire_after_write)
      .field("refresh_after_write", &self.refresh_after_write)
      .field("shards", &self.shards)
      .field("has_listener", &self.listener.is_some())
      .field("has_loader", &self.loader.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K: Send, V: Send, H> CacheBuilder<K, V, H> {
  /// Bounds the cache by entry count.
  ///
  /// A bound of zero is allowed: every write is evicted by the next
  /// maintenance run.
  pub fn maximum_size(mut self, size: u64) -> Self {
    self.maximum_size = Some(size);
    self
  }

  /// Bounds the cache by the total weight of its entries. Requires a
  /// [`weigher`](Self::weigher).
  pub fn maximum_weight(mut self, weight: u64) -> Self {
    self.maximum_weight = Some(weight);
    self
  }

  /// Sets the function that weighs each entry when it is written.
  pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
    self.weigher = Some(Arc::new(weigher));
    self
  }

  /// Expires entries a fixed time after their last read or write.
  pub fn expire_after_access(mut self, duration: Duration) -> Self {
    self.expire_after_access = Some(duration);
    self
  }

  /// Expires entries a fixed time after they were written.
  pub fn expire_after_write(mut self, duration: Duration) -> Self {
    self.expire_after_write = Some(duration);
    self
  }

  /// Computes each entry's lifetime with `expiry`.
  pub fn expire_after(mut self, expiry: impl Expiry<K, V> + 'static) -> Self {
    self.expiry = Some(Arc::new(expiry));
    self
  }

  /// Reloads an entry in the background when it is read and was written at
  /// least `duration` ago. Readers keep getting the current value meanwhile.
  ///
  /// Requires a loader.
  pub fn refresh_after_write(mut self, duration: Duration) -> Self {
    self.refresh_after_write = Some(duration);
    self
  }

  /// Sets the listener told about every removal.
  pub fn removal_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: RemovalListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Chooses where the removal listener runs. Defaults to
  /// [`ListenerDelivery::Inline`].
  pub fn listener_delivery(mut self, delivery: ListenerDelivery) -> Self {
    self.listener_delivery = delivery;
    self
  }

  /// Sets the time source used for expiry and refresh. Defaults to
  /// [`SystemClock`].
  pub fn clock(mut self, clock: impl Clock) -> Self {
    self.clock = Some(Arc::new(clock));
    self
  }

  /// Sets a custom eviction policy for bounded caches.
  ///
  /// By default, bounded caches use a W-TinyLFU policy.
  pub fn eviction_policy<Policy>(mut self, policy: Policy) -> Self
  where
    Policy: CachePolicy<K> + 'static,
  {
    self.cache_policy = Some(Arc::new(policy));
    self
  }

  /// Sets the synchronous loader.
  ///
  /// It runs on the calling thread for misses, and on the executor for
  /// reloads. `Ok(None)` means the key has no value; nothing is cached.
  pub fn loader(mut self, f: impl Fn(&K) -> LoadResult<V> + Send + Sync + 'static) -> Self {
    self.loader = Some(Loader::Sync(Arc::new(f)));
    self
  }

  /// Sets the asynchronous loader. Its futures run on the task spawner.
  pub fn async_loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LoadResult<V>> + Send + 'static,
  {
    let loader_fn = move |key| Box::pin(f(key)) as BoxFuture<'static, LoadResult<V>>;
    self.loader = Some(Loader::Async(Arc::new(loader_fn)));
    self
  }

  /// Sets a loader for many keys at once, used by `get_all`. Without one,
  /// `get_all` loads missing keys one by one.
  pub fn bulk_loader(
    mut self,
    f: impl Fn(&[K]) -> BulkLoadResult<K, V> + Send + Sync + 'static,
  ) -> Self {
    self.bulk_loader = Some(BulkLoader::Sync(Arc::new(f)));
    self
  }

  /// Sets an asynchronous loader for many keys at once.
  pub fn async_bulk_loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BulkLoadResult<K, V>> + Send + 'static,
  {
    let loader_fn = move |keys| Box::pin(f(keys)) as BoxFuture<'static, BulkLoadResult<K, V>>;
    self.bulk_loader = Some(BulkLoader::Async(Arc::new(loader_fn)));
    self
  }

  /// Sets where synchronous reloads run. Defaults to [`ThreadExecutor`].
  pub fn executor(mut self, executor: impl Executor) -> Self {
    self.executor = Some(Arc::new(executor));
    self
  }

  /// Sets the spawner for asynchronous loads. When unset, the Tokio runtime
  /// the cache is built in is used.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    // Zero is kept as is so that validation can reject it.
    self.shards = if shards == 0 { 0 } else { shards.next_power_of_two() };
    self
  }

  /// Runs maintenance on roughly one write in `chance`, rounded up to a
  /// power of two. See [`maintenance_frequency`] for presets.
  pub fn maintenance_chance(mut self, chance: u32) -> Self {
    self.maintenance_chance = chance.max(1).next_power_of_two();
    self
  }
}

// --- Default Constructor ---
impl<K: Send, V: Send> CacheBuilder<K, V, ahash::RandomState> {
  /// Creates a new `CacheBuilder` with default settings: unbounded, no
  /// expiry, no listener.
  pub fn new() -> Self {
    Self::with_hasher(ahash::RandomState::new())
  }
}

impl<K: Send, V: Send> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Send, V: Send, H> CacheBuilder<K, V, H> {
  /// Creates a builder that hashes keys with `hasher`.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      maximum_size: None,
      maximum_weight: None,
      weigher: None,
      expire_after_access: None,
      expire_after_write: None,
      expiry: None,
      refresh_after_write: None,
      listener: None,
      listener_delivery: ListenerDelivery::default(),
      clock: None,
      loader: None,
      bulk_loader: None,
      executor: None,
      spawner: None,
      cache_policy: None,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      maintenance_chance: maintenance_frequency::RESPONSIVE,
      hasher,
      _key_marker: PhantomData,
      _value_marker: PhantomData,
    }
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds a `Cache` that is filled explicitly.
  pub fn build(self) -> Result<Cache<K, V, H>, BuildError> {
    let shared = self.build_shared(Flavor::Manual)?;
    Ok(Cache { shared })
  }

  /// Builds a `LoadingCache`. Requires a loader.
  pub fn build_loading(self) -> Result<LoadingCache<K, V, H>, BuildError> {
    let shared = self.build_shared(Flavor::Loading)?;
    Ok(LoadingCache {
      cache: Cache { shared },
    })
  }

  /// Builds an `AsyncCache`. Requires a task spawner, or a Tokio runtime to
  /// take one from.
  pub fn build_async(self) -> Result<AsyncCache<K, V, H>, BuildError> {
    let shared = self.build_shared(Flavor::Async)?;
    Ok(AsyncCache { shared })
  }

  /// Validates the builder configuration.
  fn validate(&self, flavor: Flavor) -> Result<(), BuildError> {
    if self.maximum_size.is_some() && self.maximum_weight.is_some() {
      return Err(BuildError::ConflictingBounds);
    }
    let expiry_modes = [
      self.expire_after_access.is_some(),
      self.expire_after_write.is_some(),
      self.expiry.is_some(),
    ];
    if expiry_modes.iter().filter(|set| **set).count() > 1 {
      return Err(BuildError::ConflictingExpiry);
    }
    if self.weigher.is_some() && self.maximum_weight.is_none() {
      return Err(BuildError::WeigherWithoutMaximumWeight);
    }
    if self.maximum_weight.is_some() && self.weigher.is_none() {
      return Err(BuildError::MaximumWeightWithoutWeigher);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.refresh_after_write.is_some() && self.loader.is_none() {
      return Err(BuildError::RefreshRequiresLoader);
    }
    if flavor == Flavor::Loading && self.loader.is_none() {
      return Err(BuildError::MissingLoader);
    }
    Ok(())
  }

  /// Asynchronous handles and loaders need somewhere to run their futures.
  fn resolve_spawner(&mut self, flavor: Flavor) -> Result<Option<Arc<dyn TaskSpawner>>, BuildError> {
    let needs_spawner = flavor == Flavor::Async
      || matches!(self.loader, Some(Loader::Async(_)))
      || matches!(self.bulk_loader, Some(BulkLoader::Async(_)));
    let spawner = self.spawner.take();
    if !needs_spawner || spawner.is_some() {
      return Ok(spawner);
    }

    #[cfg(feature = "tokio")]
    {
      if let Some(tokio) = crate::runtime::TokioSpawner::try_current() {
        return Ok(Some(Arc::new(tokio)));
      }
    }
    Err(BuildError::SpawnerRequired)
  }

  /// Central logic to construct the shared core of the cache.
  fn build_shared(mut self, flavor: Flavor) -> Result<Arc<CacheShared<K, V, H>>, BuildError> {
    self.validate(flavor)?;
    let spawner = self.resolve_spawner(flavor)?;

    let maximum = self.maximum_size.or(self.maximum_weight);
    let policy: Arc<dyn CachePolicy<K>> = match (self.cache_policy.take(), maximum) {
      (_, None) => Arc::new(NullPolicy),
      (Some(policy), Some(_)) => policy,
      (None, Some(maximum)) => Arc::new(TinyLfuPolicy::new(maximum)),
    };

    let expiration = match (self.expire_after_access, self.expire_after_write, self.expiry.take()) {
      (Some(duration), _, _) => Expiration::AfterAccess(duration),
      (_, Some(duration), _) => Expiration::AfterWrite(duration),
      (_, _, Some(expiry)) => Expiration::Variable(expiry),
      _ => Expiration::None,
    };

    let notifier = match self.listener.take() {
      Some(listener) => Some(Notifier::spawn(listener, self.listener_delivery)?),
      None => None,
    };

    let seed = self.hasher.hash_one(self.shards as u64 ^ 0x5EED);
    tracing::debug!(
      shards = self.shards,
      ?maximum,
      ?expiration,
      "building cache"
    );

    Ok(Arc::new(CacheShared {
      store: ShardedStore::new(self.shards, self.hasher.clone()),
      pending: PendingTable::new(self.shards, self.hasher.clone()),
      metrics: Metrics::new(),
      policy,
      read_buffer: AccessBatcher::new(),
      write_buffer: WriteBuffer::new(),
      maintenance_lock: Mutex::new(()),
      rng: FastRng::new(seed),
      maintenance_chance: self.maintenance_chance,
      maximum,
      weigher: self.weigher.take(),
      expiration,
      refresh_after_write: self.refresh_after_write.map(duration_to_nanos),
      clock: self.clock.take().unwrap_or_else(|| Arc::new(SystemClock)),
      notifier,
      loader: self.loader.take(),
      bulk_loader: self.bulk_loader.take(),
      executor: self
        .executor
        .take()
        .unwrap_or_else(|| Arc::new(ThreadExecutor)),
      spawner,
    }))
  }
}
