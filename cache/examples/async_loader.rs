use ferro_cache::CacheBuilder;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  let cache = CacheBuilder::new()
    .maximum_size(1_000)
    .expire_after_access(Duration::from_secs(60))
    .async_loader({
      let counter = load_counter.clone();
      move |key: u64| {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          println!("[Loader] Fetching user {key}...");
          sleep(Duration::from_millis(200)).await;
          Ok(Some(format!("user-{key}")))
        }
      }
    })
    .build_async()
    .expect("Failed to build cache");

  // Ten concurrent requests for the same key share a single load.
  let requests: Vec<_> = (0..10)
    .map(|_| {
      let cache = cache.clone();
      tokio::spawn(async move { cache.get(&7).await })
    })
    .collect();
  for request in requests {
    let value = request.await.expect("task panicked").expect("load failed");
    println!("Received: {:?}", value.as_deref());
  }
  println!("Loader calls: {}", load_counter.load(Ordering::Relaxed));

  let users = cache.get_all([1, 2, 7]).await.expect("load failed");
  println!("Users: {:?}", users);
  println!("\nCache metrics: {:#?}", cache.metrics());
}
