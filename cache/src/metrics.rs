use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Loads ---
  pub(crate) load_successes: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,
  pub(crate) refreshes: CachePadded<AtomicU64>,

  // --- Throughput ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) replacements: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Eviction Stats ---
  pub(crate) evicted_by_size: CachePadded<AtomicU64>,
  pub(crate) evicted_by_expiry: CachePadded<AtomicU64>,

  // --- Size ---
  pub(crate) current_weight: CachePadded<AtomicU64>,
  pub(crate) entry_count: CachePadded<AtomicU64>,

  created_at: Instant,
}

fn counter() -> CachePadded<AtomicU64> {
  CachePadded::new(AtomicU64::new(0))
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: counter(),
      misses: counter(),
      load_successes: counter(),
      load_failures: counter(),
      refreshes: counter(),
      inserts: counter(),
      replacements: counter(),
      invalidations: counter(),
      evicted_by_size: counter(),
      evicted_by_expiry: counter(),
      current_weight: counter(),
      entry_count: counter(),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Accounts for an entry entering the store.
  pub(crate) fn entry_added(&self, weight: u32) {
    self.entry_count.fetch_add(1, Ordering::Relaxed);
    self
      .current_weight
      .fetch_add(u64::from(weight), Ordering::Relaxed);
  }

  /// Accounts for an entry leaving the store.
  pub(crate) fn entry_removed(&self, weight: u32) {
    self.entry_count.fetch_sub(1, Ordering::Relaxed);
    self
      .current_weight
      .fetch_sub(u64::from(weight), Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn current_weight(&self) -> u64 {
    self.current_weight.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn entry_count(&self) -> u64 {
    self.entry_count.load(Ordering::Relaxed)
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      load_successes: self.load_successes.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      refreshes: self.refreshes.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      replacements: self.replacements.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evicted_by_size: self.evicted_by_size.load(Ordering::Relaxed),
      evicted_by_expiry: self.evicted_by_expiry.load(Ordering::Relaxed),
      current_weight: self.current_weight(),
      entry_count: self.entry_count(),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of lookups that found a live entry.
  pub hits: u64,
  /// The number of lookups that found nothing or an expired entry.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Loads that produced a value or no value.
  pub load_successes: u64,
  /// Loads that failed or panicked.
  pub load_failures: u64,
  /// Background reloads started.
  pub refreshes: u64,
  /// Entries written under a key that had no live entry.
  pub inserts: u64,
  /// Entries written over a live entry.
  pub replacements: u64,
  /// Entries removed by `invalidate*` calls.
  pub invalidations: u64,
  /// Entries evicted to stay within the size or weight bound.
  pub evicted_by_size: u64,
  /// Entries removed because their lifetime elapsed.
  pub evicted_by_expiry: u64,
  /// Total weight of the entries in the store.
  pub current_weight: u64,
  /// Number of entries in the store.
  pub entry_count: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("load_successes", &self.load_successes)
      .field("load_failures", &self.load_failures)
      .field("refreshes", &self.refreshes)
      .field("inserts", &self.inserts)
      .field("replacements", &self.replacements)
      .field("invalidations", &self.invalidations)
      .field("evicted_by_size", &self.evicted_by_size)
      .field("evicted_by_expiry", &self.evicted_by_expiry)
      .field("current_weight", &self.current_weight)
      .field("entry_count", &self.entry_count)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
