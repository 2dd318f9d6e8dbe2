use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deadline value meaning "never expires".
pub(crate) const NO_EXPIRY: u64 = u64::MAX;

/// A container for a value in the cache, holding all necessary metadata.
///
/// A write always installs a fresh `CacheEntry`, so the write time and weight
/// are immutable. Reads may move the access time and, depending on the expiry
/// mode, the deadline.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  value: Arc<V>,
  weight: u32,
  /// Tick of the write that created this entry.
  write_time: u64,
  /// Tick of the last read, or of the write if never read.
  access_time: AtomicU64,
  /// Absolute tick at which the entry is expired. `NO_EXPIRY` means never.
  expires_at: AtomicU64,
  /// Set while a background reload of this entry is running.
  refresh_in_flight: AtomicBool,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, weight: u32, now: u64, expires_at: u64) -> Self {
    Self {
      value,
      weight,
      write_time: now,
      access_time: AtomicU64::new(now),
      expires_at: AtomicU64::new(expires_at),
      refresh_in_flight: AtomicBool::new(false),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn value_ref(&self) -> &V {
    &self.value
  }

  #[inline]
  pub(crate) fn weight(&self) -> u32 {
    self.weight
  }

  #[inline]
  pub(crate) fn write_time(&self) -> u64 {
    self.write_time
  }

  #[cfg(test)]
  pub(crate) fn access_time(&self) -> u64 {
    self.access_time.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn expires_at(&self) -> u64 {
    self.expires_at.load(Ordering::Relaxed)
  }

  #[inline]
  pub(crate) fn set_expires_at(&self, deadline: u64) {
    self.expires_at.store(deadline, Ordering::Relaxed);
  }

  /// Pushes the deadline out to `deadline`. Never pulls it in, so racing
  /// readers with older clocks cannot shorten an access-based lifetime.
  #[inline]
  pub(crate) fn extend_expires_at(&self, deadline: u64) {
    self.expires_at.fetch_max(deadline, Ordering::Relaxed);
  }

  /// Records a read at `now`.
  #[inline]
  pub(crate) fn touch(&self, now: u64) {
    self.access_time.fetch_max(now, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn is_expired(&self, now: u64) -> bool {
    now >= self.expires_at()
  }

  /// The lifetime left before this entry expires, as seen at `now`.
  pub(crate) fn remaining(&self, now: u64) -> Duration {
    match self.expires_at() {
      NO_EXPIRY => Duration::MAX,
      deadline => Duration::from_nanos(deadline.saturating_sub(now)),
    }
  }

  /// Age of the value, measured from its write.
  #[inline]
  pub(crate) fn age(&self, now: u64) -> u64 {
    now.saturating_sub(self.write_time)
  }

  /// Claims the right to refresh this entry. Returns `false` if a refresh is
  /// already running.
  pub(crate) fn try_begin_refresh(&self) -> bool {
    self
      .refresh_in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub(crate) fn end_refresh(&self) {
    self.refresh_in_flight.store(false, Ordering::Release);
  }

  #[cfg(test)]
  pub(crate) fn is_refreshing(&self) -> bool {
    self.refresh_in_flight.load(Ordering::Acquire)
  }
}
