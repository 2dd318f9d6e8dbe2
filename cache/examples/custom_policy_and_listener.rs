use ferro_cache::{policy::lru::Lru, CacheBuilder, RemovalCause, RemovalListener};
use std::sync::Arc;

// A listener that prints every removal.
struct PrintListener;

impl RemovalListener<i32, String> for PrintListener {
  fn on_removal(&self, key: i32, value: Option<Arc<String>>, cause: RemovalCause) {
    println!("[Listener] Key: {key}, Value: {value:?}, Cause: {cause:?}");
  }
}

fn main() {
  println!("--- Cache with a plain LRU policy and a removal listener ---");

  let cache = CacheBuilder::new()
    .maximum_size(3)
    .shards(1)
    .eviction_policy(Lru::new())
    .removal_listener(PrintListener)
    .build()
    .expect("Failed to build cache");

  cache.put(1, "one".to_string());
  cache.put(2, "two".to_string());
  cache.put(3, "three".to_string());
  cache.clean_up();
  println!("\nPut keys 1, 2, 3. Cache is full.");

  // Key 1 becomes the most recently used.
  cache.get_if_present(&1);

  println!("\nPutting key 4. Key 2 is the least recently used and goes.");
  cache.put(4, "four".to_string());
  cache.clean_up();

  assert!(cache.contains_key(&1), "Key 1 was used recently");
  assert!(!cache.contains_key(&2), "Key 2 should have been evicted");
  assert!(cache.contains_key(&3));
  assert!(cache.contains_key(&4));

  println!("\nCache metrics: {:#?}", cache.metrics());
}
