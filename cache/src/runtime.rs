use std::{future::Future, pin::Pin, thread};

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Asynchronous loads and reloads run on the spawner the cache was built with.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner for the Tokio runtime the caller is running in, or
  /// `None` outside of a runtime.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  /// Creates a spawner for a specific runtime.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}

/// Runs blocking work, such as a synchronous reload, off the caller's path.
pub trait Executor: Send + Sync + 'static {
  fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs each task on a new, named thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
  fn execute(&self, task: Box<dyn FnOnce() + Send>) {
    // The task moves into the closure; keep a way to run it if the thread
    // cannot be created.
    let slot = std::sync::Arc::new(parking_lot::Mutex::new(Some(task)));
    let remote = slot.clone();
    let spawned = thread::Builder::new()
      .name("ferro-cache-refresh".into())
      .spawn(move || {
        if let Some(task) = remote.lock().take() {
          task();
        }
      });
    if let Err(err) = spawned {
      tracing::warn!(error = %err, "failed to spawn a refresh thread, running inline");
      if let Some(task) = slot.lock().take() {
        task();
      }
    }
  }
}

/// Runs each task immediately on the calling thread.
///
/// Useful in tests, where a reload should have finished by the time the read
/// that triggered it returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

impl Executor for DirectExecutor {
  fn execute(&self, task: Box<dyn FnOnce() + Send>) {
    task();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  #[test]
  fn direct_executor_runs_inline() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    DirectExecutor.execute(Box::new(move || flag.store(true, Ordering::SeqCst)));
    assert!(ran.load(Ordering::SeqCst));
  }

  #[test]
  fn thread_executor_runs_on_another_thread() {
    let (tx, rx) = std::sync::mpsc::channel();
    let caller = thread::current().id();
    ThreadExecutor.execute(Box::new(move || {
      tx.send(thread::current().id()).unwrap();
    }));
    let worker = rx.recv().unwrap();
    assert_ne!(worker, caller);
  }
}
