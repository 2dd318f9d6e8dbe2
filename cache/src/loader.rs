use crate::error::{BoxError, LoadError};
use crate::store::hash_key;

use core::fmt;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// What a loader returns: a value, no value (`Ok(None)`, never cached), or an
/// error.
pub type LoadResult<V> = Result<Option<V>, BoxError>;

/// What a bulk loader returns. Keys missing from the map have no value.
pub type BulkLoadResult<K, V> = Result<HashMap<K, V>, BoxError>;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The outcome every waiter of a load observes.
pub type LoadOutcome<V> = Result<Option<Arc<V>>, LoadError>;

/// An enum that holds either a synchronous or an asynchronous loader function.
pub(crate) enum Loader<K, V> {
  Sync(Arc<dyn Fn(&K) -> LoadResult<V> + Send + Sync>),
  Async(Arc<dyn Fn(K) -> BoxFuture<'static, LoadResult<V>> + Send + Sync>),
}

impl<K, V> Clone for Loader<K, V> {
  fn clone(&self) -> Self {
    match self {
      Loader::Sync(f) => Loader::Sync(f.clone()),
      Loader::Async(f) => Loader::Async(f.clone()),
    }
  }
}

/// Loads many keys with one call.
pub(crate) enum BulkLoader<K, V> {
  Sync(Arc<dyn Fn(&[K]) -> BulkLoadResult<K, V> + Send + Sync>),
  Async(Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, BulkLoadResult<K, V>> + Send + Sync>),
}

impl<K, V> Clone for BulkLoader<K, V> {
  fn clone(&self) -> Self {
    match self {
      BulkLoader::Sync(f) => BulkLoader::Sync(f.clone()),
      BulkLoader::Async(f) => BulkLoader::Async(f.clone()),
    }
  }
}

/// Represents a waiter in the queue for a `LoadFuture`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

/// The internal state of a value being loaded.
enum State<V> {
  Pending,
  Resolved(Arc<V>),
  Absent,
  Failed(LoadError),
}

impl<V> State<V> {
  fn outcome(&self) -> Option<LoadOutcome<V>> {
    match self {
      State::Pending => None,
      State::Resolved(value) => Some(Ok(Some(value.clone()))),
      State::Absent => Some(Ok(None)),
      State::Failed(err) => Some(Err(err.clone())),
    }
  }
}

/// The internal, mutex-protected core of the LoadFuture.
struct Inner<V> {
  state: State<V>,
  waiters: Vec<Waiter>,
}

/// A value being computed for the cache.
/// It can be awaited by multiple sync threads and async tasks simultaneously.
struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  fn new(state: State<V>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state,
        waiters: Vec::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters. Only the first completion
  /// takes effect.
  fn complete(&self, outcome: LoadOutcome<V>) -> bool {
    let waiters = {
      let mut inner = self.inner.lock();
      if !matches!(inner.state, State::Pending) {
        return false;
      }
      inner.state = match outcome {
        Ok(Some(value)) => State::Resolved(value),
        Ok(None) => State::Absent,
        Err(err) => State::Failed(err),
      };
      std::mem::take(&mut inner.waiters)
    };
    for waiter in waiters {
      waiter.wake();
    }
    true
  }
}

/// A handle to a value that may not have been computed yet.
///
/// A `PendingResult` is resolved exactly once, to a value, to "no value", or to
/// an error. Any number of clones may wait on it, from threads with
/// [`wait`](PendingResult::wait) or from tasks by awaiting it. Dropping a
/// handle never cancels the computation behind it.
pub struct PendingResult<V> {
  inner: Arc<LoadFuture<V>>,
}

impl<V> Clone for PendingResult<V> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<V> fmt::Debug for PendingResult<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingResult")
      .field("done", &self.is_done())
      .finish()
  }
}

impl<V> PendingResult<V> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Arc::new(LoadFuture::new(State::Pending)),
    }
  }

  /// A result that is already resolved to `value`.
  pub fn resolved(value: Arc<V>) -> Self {
    Self {
      inner: Arc::new(LoadFuture::new(State::Resolved(value))),
    }
  }

  pub(crate) fn complete(&self, outcome: LoadOutcome<V>) -> bool {
    self.inner.complete(outcome)
  }

  pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  /// Returns `true` once the result is resolved.
  pub fn is_done(&self) -> bool {
    !matches!(self.inner.inner.lock().state, State::Pending)
  }

  /// Returns the outcome if the result is resolved, without waiting.
  pub fn try_get(&self) -> Option<LoadOutcome<V>> {
    self.inner.inner.lock().state.outcome()
  }

  /// Blocks the current thread until the result is resolved.
  pub fn wait(&self) -> LoadOutcome<V> {
    loop {
      {
        let mut inner = self.inner.inner.lock();
        if let Some(outcome) = inner.state.outcome() {
          return outcome;
        }
        let me = thread::current();
        let registered = inner
          .waiters
          .iter()
          .any(|w| matches!(w, Waiter::Sync(t) if t.id() == me.id()));
        if !registered {
          inner.waiters.push(Waiter::Sync(me));
        }
      }
      // Spurious wakeups are handled by re-checking the state.
      thread::park();
    }
  }
}

impl<V> Future for PendingResult<V> {
  type Output = LoadOutcome<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.inner.lock();
    if let Some(outcome) = inner.state.outcome() {
      return Poll::Ready(outcome);
    }
    let registered = inner
      .waiters
      .iter()
      .any(|w| matches!(w, Waiter::Async(waker) if waker.will_wake(cx.waker())));
    if !registered {
      inner.waiters.push(Waiter::Async(cx.waker().clone()));
    }
    Poll::Pending
  }
}

/// In-flight loads, sharded the same way as the store so that a key's pending
/// shard is always taken before its store shard.
pub(crate) struct PendingTable<K, V, H> {
  shards: Box<[CachePadded<Mutex<HashMap<K, PendingResult<V>, H>>>]>,
  hasher: H,
}

impl<K, V, H> PendingTable<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Mutex::new(HashMap::with_hasher(hasher.clone()))))
      .collect();
    Self { shards, hasher }
  }

  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &Mutex<HashMap<K, PendingResult<V>, H>> {
    let index = hash_key(&self.hasher, key) as usize % self.shards.len();
    &self.shards[index]
  }

  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Mutex<HashMap<K, PendingResult<V>, H>>> {
    self.shards.iter().map(|padded| &**padded)
  }

  pub(crate) fn get(&self, key: &K) -> Option<PendingResult<V>> {
    self.shard(key).lock().get(key).cloned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[test]
  fn completes_only_once() {
    let pending = PendingResult::new();
    assert!(!pending.is_done());
    assert!(pending.try_get().is_none());

    assert!(pending.complete(Ok(Some(Arc::new(1)))));
    assert!(!pending.complete(Ok(Some(Arc::new(2)))));

    let value = pending.try_get().unwrap().unwrap().unwrap();
    assert_eq!(*value, 1);
  }

  #[test]
  fn failure_is_observed_by_every_clone() {
    let pending: PendingResult<u32> = PendingResult::new();
    let other = pending.clone();
    pending.complete(Err(LoadError::Panicked));
    assert!(matches!(other.wait(), Err(LoadError::Panicked)));
    assert!(matches!(pending.wait(), Err(LoadError::Panicked)));
  }

  #[test]
  fn sync_waiters_are_released() {
    let pending: PendingResult<String> = PendingResult::new();
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let pending = pending.clone();
        let released = released.clone();
        thread::spawn(move || {
          let value = pending.wait().unwrap().unwrap();
          assert_eq!(value.as_str(), "done");
          released.fetch_add(1, Ordering::SeqCst);
        })
      })
      .collect();

    thread::sleep(Duration::from_millis(20));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    pending.complete(Ok(Some(Arc::new("done".to_string()))));

    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn async_waiters_are_released() {
    let pending: PendingResult<u32> = PendingResult::new();
    let waiter = pending.clone();
    let completer = thread::spawn(move || {
      thread::sleep(Duration::from_millis(10));
      pending.complete(Ok(None));
    });
    let outcome = futures_executor::block_on(waiter);
    assert!(matches!(outcome, Ok(None)));
    completer.join().unwrap();
  }

  #[test]
  fn resolved_is_immediately_ready() {
    let pending = PendingResult::resolved(Arc::new(5));
    assert!(pending.is_done());
    assert_eq!(*futures_executor::block_on(pending).unwrap().unwrap(), 5);
  }
}
