use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// A fast, `async`-safe, and non-cryptographically secure pseudo-random number
/// generator using a Weyl sequence on an atomic integer. Used to decide when a
/// write should also run maintenance.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  pub(crate) fn new(seed: u64) -> Self {
    Self {
      state: AtomicU64::new(if seed == 0 { 1 } else { seed }),
    }
  }

  #[inline(always)]
  fn next_weyl(&self) -> u64 {
    // Wrapping add; only the atomicity of this one value matters.
    self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed)
  }

  /// Returns true with a probability of 1 in `denominator_pow2`.
  /// The denominator must be a power of two.
  #[inline(always)]
  pub(crate) fn should_run(&self, denominator_pow2: u32) -> bool {
    let mask = u64::from(denominator_pow2.max(1) - 1);
    (self.next_weyl() & mask) == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn denominator_one_always_runs() {
    let rng = FastRng::new(7);
    assert!((0..100).all(|_| rng.should_run(1)));
  }

  #[test]
  fn runs_roughly_once_per_denominator() {
    let rng = FastRng::new(12345);
    let hits = (0..64_000).filter(|_| rng.should_run(64)).count();
    assert!(hits > 500 && hits < 1500, "unexpected hit count {hits}");
  }
}
