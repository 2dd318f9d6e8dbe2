//! A concurrent, in-memory, sync/async cache engine.
//!
//! # Features
//! - **High Concurrency**: Built with a sharded architecture to minimize lock contention.
//! - **Sync & Async**: [`Cache`] and [`LoadingCache`] block, [`AsyncCache`]
//!   hands out [`PendingResult`]s that resolve when a load finishes.
//! - **Bounded Size**: Entry count or entry weight, enforced by a W-TinyLFU
//!   policy that applies reads and writes in batches.
//! - **Expiry**: After access, after write, or per entry through [`Expiry`].
//! - **Deduplicated Loading**: At most one load per key at a time, single or
//!   bulk, with refresh-ahead reloads that never block readers.
//! - **Removal Notifications**: Every removal is reported with its
//!   [`RemovalCause`], inline or on a background thread.
//! - **Deterministic Time**: Every time-dependent decision reads an
//!   injectable [`Clock`].
//!
//! # Example
//!
//! ```
//! use ferro_cache::CacheBuilder;
//!
//! let cache = CacheBuilder::<u64, String>::new()
//!   .maximum_size(100)
//!   .loader(|key: &u64| Ok(Some(format!("value-{key}"))))
//!   .build_loading()
//!   .unwrap();
//!
//! let value = cache.get(&7).unwrap();
//! assert_eq!(value.as_deref().map(String::as_str), Some("value-7"));
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod expiry;
pub mod handles;
pub mod listener;
pub mod loader;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod time;

// Internal, crate-only modules
mod entry;
mod refresh;
mod rng;
mod shared;
mod store;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use error::{BoxError, BuildError, LoadError};
pub use expiry::{Expiration, Expiry};
pub use handles::{AsyncCache, Cache, LoadingCache};
pub use listener::{ListenerDelivery, RemovalCause, RemovalListener};
pub use loader::{BoxFuture, BulkLoadResult, LoadOutcome, LoadResult, PendingResult};
pub use metrics::MetricsSnapshot;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use runtime::{DirectExecutor, Executor, TaskSpawner, ThreadExecutor};
pub use time::{Clock, ManualClock, SystemClock};
