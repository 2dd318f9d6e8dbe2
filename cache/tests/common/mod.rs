#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::time::Duration;

use ferro_cache::{Cache, CacheBuilder, ManualClock, RemovalCause};
use parking_lot::Mutex;

// A custom hasher that allows us to control which shard a key is assigned to.
// It simply uses the integer value of the key as its hash.
// For a 4-shard cache:
// - key 0 -> shard 0 (0 % 4 = 0)
// - key 1 -> shard 1 (1 % 4 = 1)
// - key 4 -> shard 0 (4 % 4 = 0)
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

pub fn build_test_cache(shards: usize) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::with_hasher(ShardControllingHasher)
    .shards(shards)
    .build()
    .unwrap()
}

/// Removal notifications in the order they were delivered, with values
/// copied out of their `Arc`.
pub type Events<K, V> = Arc<Mutex<Vec<(K, Option<V>, RemovalCause)>>>;

/// A removal listener that appends to the returned log.
pub fn recorder<K, V>() -> (
  Events<K, V>,
  impl Fn(K, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static,
)
where
  K: Send + 'static,
  V: Clone + Send + Sync + 'static,
{
  let events: Events<K, V> = Arc::default();
  let log = events.clone();
  let listener = move |key: K, value: Option<Arc<V>>, cause: RemovalCause| {
    log.lock().push((key, value.map(|v| (*v).clone()), cause));
  };
  (events, listener)
}

pub fn causes<K, V>(events: &Events<K, V>) -> Vec<RemovalCause> {
  events.lock().iter().map(|(_, _, cause)| *cause).collect()
}

pub fn manual_clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new())
}

pub fn millis(ms: u64) -> Duration {
  Duration::from_millis(ms)
}

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}
