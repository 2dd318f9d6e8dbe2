use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// The single, static reference point for the system clock.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// A source of monotonic time, read as nanoseconds since an arbitrary origin.
///
/// The cache never reads system time directly. Every timestamp it stores
/// (write time, access time, expiry deadline) comes from the `Clock` the cache
/// was built with, which lets tests substitute a [`ManualClock`].
pub trait Clock: Send + Sync + 'static {
  /// Returns the current tick in nanoseconds.
  fn now(&self) -> u64;
}

/// The default clock, backed by `Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> u64 {
    duration_to_nanos(Instant::now().saturating_duration_since(*CACHE_EPOCH))
  }
}

/// A clock that only moves when told to.
///
/// Time starts at zero and advances by explicit deltas, with no relation to
/// wall time.
///
/// ```
/// use ferro_cache::time::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(4900));
/// assert_eq!(clock.now(), 4_900_000_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
  nanos: AtomicU64,
}

impl ManualClock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Moves the clock forward by `delta`.
  pub fn advance(&self, delta: Duration) {
    self
      .nanos
      .fetch_add(duration_to_nanos(delta), Ordering::SeqCst);
  }

  /// Sets the clock to an absolute tick.
  pub fn set(&self, nanos: u64) {
    self.nanos.store(nanos, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  #[inline]
  fn now(&self) -> u64 {
    self.nanos.load(Ordering::SeqCst)
  }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
  #[inline]
  fn now(&self) -> u64 {
    (**self).now()
  }
}

/// Converts a duration to nanoseconds, saturating at `u64::MAX`.
#[inline]
pub(crate) fn duration_to_nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Returns the tick at which something started at `now` with lifetime
/// `duration` ends.
#[inline]
pub(crate) fn deadline(now: u64, duration: Duration) -> u64 {
  now.saturating_add(duration_to_nanos(duration))
}
