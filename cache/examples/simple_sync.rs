use ferro_cache::{CacheBuilder, RemovalCause};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
  // A cache of at most 100 entries that drops entries 2 seconds after they
  // were written.
  let cache = CacheBuilder::new()
    .maximum_size(100)
    .expire_after_write(Duration::from_secs(2))
    .removal_listener(|key: String, value: Option<Arc<u64>>, cause: RemovalCause| {
      println!("[Listener] {key} -> {value:?} removed ({cause:?})");
    })
    .build()
    .expect("Failed to build cache");

  println!("Putting ('key1', 100) into the cache.");
  cache.put("key1".to_string(), 100);

  match cache.get_if_present(&"key1".to_string()) {
    Some(value) => println!("Found value for key1: {}", value),
    None => println!("Value for key1 not found."),
  }

  println!("\nCache metrics: {:#?}", cache.metrics());

  println!("\nWaiting 3 seconds for the entry to expire...");
  thread::sleep(Duration::from_secs(3));

  match cache.get_if_present(&"key1".to_string()) {
    Some(value) => println!("Found value for key1: {}", value),
    None => println!("Value for key1 not found (as expected after expiry)."),
  }

  cache.clean_up();
  println!("\nCache metrics after expiration: {:#?}", cache.metrics());
}
