//! Presets for [`CacheBuilder::maintenance_chance`](crate::CacheBuilder::maintenance_chance).
//!
//! Maintenance also runs whenever the cache is over its bound or the write
//! buffer fills up, so these only tune how eagerly reads and expiries are
//! folded into the eviction policy between those points.

/// Runs maintenance on about one write in 16. The default.
pub const RESPONSIVE: u32 = 16;

/// Runs maintenance on about one write in 64. Suits write-heavy caches that
/// can let a few more events queue up between runs.
pub const THROUGHPUT: u32 = 64;

/// Runs maintenance on about one write in 256.
///
/// Expired entries and buffered reads may linger noticeably longer between
/// runs; call `clean_up` if that matters.
pub const LOW_OVERHEAD: u32 = 256;
