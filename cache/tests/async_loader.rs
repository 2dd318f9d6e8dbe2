mod common;

use common::recorder;
use ferro_cache::{BoxError, CacheBuilder, LoadError, RemovalCause};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tokio::sync::{Barrier, Notify};
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_async_loader_basic() {
  let load_count = Arc::new(AtomicUsize::new(0));

  let cache = CacheBuilder::<i32, i32>::default()
    .maximum_size(10)
    .async_loader({
      let load_count = load_count.clone();
      move |key: i32| {
        let load_count = load_count.clone();
        async move {
          load_count.fetch_add(1, Ordering::SeqCst);
          Ok(Some(key * 10))
        }
      }
    })
    .build_async()
    .unwrap();

  // 1. A miss starts a load and hands back its pending result.
  let value = cache.get(&5).await.unwrap();
  assert_eq!(value.as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
  assert_eq!(cache.metrics().misses, 1);
  assert_eq!(cache.metrics().inserts, 1);

  // 2. A hit is already resolved.
  let pending = cache.get(&5);
  assert!(pending.is_done());
  assert_eq!(pending.await.unwrap().as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "Loader should not be called again");
  assert_eq!(cache.metrics().hits, 1);
}

#[tokio::test]
async fn test_async_loader_thundering_herd() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let num_tasks = 20;

  let cache = CacheBuilder::<i32, i32>::default()
    .async_loader({
      let load_count = load_count.clone();
      move |key: i32| {
        let load_count = load_count.clone();
        async move {
          sleep(Duration::from_millis(100)).await;
          load_count.fetch_add(1, Ordering::SeqCst);
          Ok(Some(key * 10))
        }
      }
    })
    .build_async()
    .unwrap();

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut handles = vec![];
  for _ in 0..num_tasks {
    let cache = cache.clone();
    let barrier = barrier.clone();
    handles.push(tokio::spawn(async move {
      barrier.wait().await;
      cache.get(&42).await
    }));
  }

  for handle in handles {
    let value = handle.await.unwrap().unwrap();
    assert_eq!(value.as_deref(), Some(&420));
  }
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_returns_before_the_load_finishes() {
  let cache = CacheBuilder::<i32, i32>::default()
    .async_loader(|key: i32| async move {
      sleep(Duration::from_millis(50)).await;
      Ok(Some(key))
    })
    .build_async()
    .unwrap();

  let pending = cache.get(&1);
  assert!(!pending.is_done());
  assert!(pending.try_get().is_none());

  // Readers that only peek see the same in-flight load.
  let peeked = cache.get_if_present(&1).expect("load is in flight");
  assert_eq!(peeked.await.unwrap().as_deref(), Some(&1));
  assert_eq!(pending.await.unwrap().as_deref(), Some(&1));
  assert!(cache.get_if_present(&2).is_none());
}

#[tokio::test]
async fn test_failed_async_load_reports_an_error_removal() {
  let (events, listener) = recorder::<i32, i32>();
  let attempts = Arc::new(AtomicUsize::new(0));
  let cache = CacheBuilder::<i32, i32>::default()
    .async_loader({
      let attempts = attempts.clone();
      move |key: i32| {
        let first = attempts.fetch_add(1, Ordering::SeqCst) == 0;
        async move {
          if first {
            Err(BoxError::from("flaky"))
          } else {
            Ok(Some(key))
          }
        }
      }
    })
    .removal_listener(listener)
    .build_async()
    .unwrap();

  let err = cache.get(&9).await.unwrap_err();
  assert!(matches!(err, LoadError::Failed(_)));
  assert_eq!(*events.lock(), vec![(9, None, RemovalCause::Error)]);

  // The failure was not cached.
  assert_eq!(cache.get(&9).await.unwrap().as_deref(), Some(&9));
  assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_async_loader() {
  common::init_tracing();
  let cache = CacheBuilder::<i32, i32>::default()
    .async_loader(|key: i32| async move {
      if key < 0 {
        panic!("negative key");
      }
      Ok(Some(key))
    })
    .build_async()
    .unwrap();

  assert!(matches!(cache.get(&-1).await, Err(LoadError::Panicked)));
  assert_eq!(cache.get(&1).await.unwrap().as_deref(), Some(&1));
}

#[tokio::test]
async fn test_put_pending_supersedes_an_in_flight_load() {
  let cache = CacheBuilder::<i32, &'static str>::default()
    .async_loader(|_key: i32| async move {
      sleep(Duration::from_millis(100)).await;
      Ok(Some("from-loader"))
    })
    .build_async()
    .unwrap();

  let loading = cache.get(&1);
  let pending = cache.put_pending(1, async { Ok(Some("from-put")) });
  assert_eq!(pending.await.unwrap().as_deref(), Some(&"from-put"));

  // The superseded load still answers its own waiters, but is not stored.
  assert_eq!(loading.await.unwrap().as_deref(), Some(&"from-loader"));
  assert_eq!(cache.get(&1).await.unwrap().as_deref(), Some(&"from-put"));
}

#[tokio::test]
async fn test_cache_without_a_loader() {
  let cache = CacheBuilder::<i32, i32>::default().build_async().unwrap();
  cache.put(1, 10);
  assert_eq!(cache.get(&1).await.unwrap().as_deref(), Some(&10));
  assert!(matches!(cache.get(&2).await, Err(LoadError::MissingLoader)));

  let previous = cache.invalidate(&1);
  assert_eq!(previous.as_deref(), Some(&10));
  assert_eq!(cache.estimated_size(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synchronous_view_shares_the_cache() {
  let cache = CacheBuilder::<i32, i32>::default()
    .async_loader(|key: i32| async move { Ok(Some(key * 2)) })
    .build_async()
    .unwrap();

  let view = cache.synchronous();
  let value = tokio::task::spawn_blocking(move || view.get(&21))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(value.as_deref(), Some(&42));
  assert!(cache.get(&21).is_done());
}

fn gated_async_cache(gate: Arc<Notify>) -> ferro_cache::AsyncCache<i32, i32> {
  CacheBuilder::<i32, i32>::default()
    .async_loader(move |key: i32| {
      let gate = gate.clone();
      async move {
        gate.notified().await;
        Ok(Some(key * 10))
      }
    })
    .build_async()
    .unwrap()
}

#[tokio::test]
async fn test_async_put_during_a_load_is_not_overwritten() {
  let gate = Arc::new(Notify::new());
  let cache = gated_async_cache(gate.clone());

  let pending = cache.get(&1);
  cache.put(1, 999);
  gate.notify_one();

  assert_eq!(pending.await.unwrap().as_deref(), Some(&10));
  let stored = cache.get_if_present(&1).unwrap().await.unwrap();
  assert_eq!(stored.as_deref(), Some(&999));
}

#[tokio::test]
async fn test_async_invalidate_during_a_load_keeps_the_key_absent() {
  let gate = Arc::new(Notify::new());
  let cache = gated_async_cache(gate.clone());

  let pending = cache.get(&1);
  assert_eq!(cache.invalidate(&1), None);
  gate.notify_one();

  assert_eq!(pending.await.unwrap().as_deref(), Some(&10));
  assert!(cache.get_if_present(&1).is_none());
  assert_eq!(cache.estimated_size(), 0);
}
