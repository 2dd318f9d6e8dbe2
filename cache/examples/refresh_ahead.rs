use ferro_cache::CacheBuilder;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct Data {
  version: usize,
  content: String,
}

fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  // Entries live for 10 seconds but are reloaded in the background once they
  // are 2 seconds old.
  let cache = CacheBuilder::new()
    .expire_after_write(Duration::from_secs(10))
    .refresh_after_write(Duration::from_secs(2))
    .loader({
      let counter = load_counter.clone();
      move |key: &String| {
        let version = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[Loader] Loading version {} for key '{}'...", version, key);
        thread::sleep(Duration::from_millis(500));
        Ok(Some(Data {
          version,
          content: format!("Content for {} - version {}", key, version),
        }))
      }
    })
    .build_loading()
    .expect("Failed to build cache");

  let key = "my-data".to_string();

  println!("--- Step 1: Initial load ---");
  let value = cache.get(&key).expect("load failed").expect("no value");
  println!("Received: {:?}", *value);
  assert_eq!(value.version, 1);

  println!("\n--- Step 2: Wait until the entry is due for a reload ---");
  thread::sleep(Duration::from_secs(3));

  // The stale value is served immediately while version 2 loads.
  let value = cache.get(&key).expect("load failed").expect("no value");
  println!("Received (stale): {:?}", *value);
  assert_eq!(value.version, 1);

  println!("\n--- Step 3: The reload has landed ---");
  thread::sleep(Duration::from_secs(1));
  let value = cache.get_if_present(&key).expect("entry is present");
  println!("Received (fresh): {:?}", *value);
  assert_eq!(value.version, 2);
  println!("Loader calls: {}", load_counter.load(Ordering::Relaxed));
}
