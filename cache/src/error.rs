use std::error::Error;
use std::sync::Arc;

use thiserror::Error;

/// A boxed error returned by user-supplied loaders.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Errors that can occur when building a cache.
///
/// All of these are configuration mistakes and are reported by the `build*`
/// methods of [`CacheBuilder`](crate::CacheBuilder), never later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// Both `maximum_size` and `maximum_weight` were set.
  #[error("maximum_size and maximum_weight are mutually exclusive")]
  ConflictingBounds,
  /// More than one of `expire_after_access`, `expire_after_write` and
  /// `expire_after` was set.
  #[error("expire_after_access, expire_after_write and expire_after are mutually exclusive")]
  ConflictingExpiry,
  /// A weigher was set without a `maximum_weight` to weigh against.
  #[error("a weigher requires maximum_weight")]
  WeigherWithoutMaximumWeight,
  /// `maximum_weight` was set without a weigher.
  #[error("maximum_weight requires a weigher")]
  MaximumWeightWithoutWeigher,
  /// `refresh_after_write` was set on a cache that has no loader.
  #[error("refresh_after_write requires a loading cache")]
  RefreshRequiresLoader,
  /// A loading cache was requested but no loader was configured.
  #[error("a loading cache requires a loader or async_loader")]
  MissingLoader,
  /// An async loader (or an async cache) needs a task spawner, none was
  /// configured, and no Tokio runtime was available to default to.
  #[error("an async loader requires a task spawner or a running Tokio runtime")]
  SpawnerRequired,
  /// The cache was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// The background notifier thread could not be started.
  #[error("failed to spawn the notifier thread: {0}")]
  ThreadSpawn(String),
}

/// The error returned when a value could not be loaded.
///
/// A single failed load is observed by every caller waiting on it, so this
/// type is cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
  /// The loader returned an error.
  #[error("loader failed: {0}")]
  Failed(Arc<dyn Error + Send + Sync + 'static>),
  /// The loader panicked, or its task was dropped before finishing. Waiters
  /// are released either way.
  #[error("loader panicked")]
  Panicked,
  /// The operation needs a loader but the cache has none.
  #[error("no loader is configured for this cache")]
  MissingLoader,
}

impl LoadError {
  /// Returns the loader's own error, if this is a `Failed` error.
  pub fn loader_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
    match self {
      LoadError::Failed(err) => Some(err.as_ref()),
      _ => None,
    }
  }
}

impl From<BoxError> for LoadError {
  fn from(err: BoxError) -> Self {
    LoadError::Failed(Arc::from(err))
  }
}
