use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A write the eviction policy has not seen yet.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WriteEvent<K> {
  /// A value was stored under the key, with its weight.
  Upsert(K, u64),
  /// The key left the store.
  Remove(K),
}

/// An ordered log of writes awaiting maintenance.
///
/// Events for a key are pushed while that key's shard write lock is held, so
/// their order here matches the order the store saw them in.
pub(crate) struct WriteBuffer<K> {
  events: Mutex<Vec<WriteEvent<K>>>,
  len: AtomicUsize,
}

impl<K> WriteBuffer<K> {
  pub(crate) fn new() -> Self {
    Self {
      events: Mutex::new(Vec::new()),
      len: AtomicUsize::new(0),
    }
  }

  pub(crate) fn push(&self, event: WriteEvent<K>) {
    let mut events = self.events.lock();
    events.push(event);
    self.len.store(events.len(), Ordering::Relaxed);
  }

  /// An approximate count of buffered events.
  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.len.load(Ordering::Relaxed)
  }

  pub(crate) fn drain(&self) -> Vec<WriteEvent<K>> {
    let mut events = self.events.lock();
    self.len.store(0, Ordering::Relaxed);
    std::mem::take(&mut *events)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn drain_preserves_order() {
    let buffer = WriteBuffer::new();
    buffer.push(WriteEvent::Upsert("a", 1));
    buffer.push(WriteEvent::Remove("a"));
    buffer.push(WriteEvent::Upsert("a", 2));
    assert_eq!(buffer.len(), 3);

    assert_eq!(
      buffer.drain(),
      vec![
        WriteEvent::Upsert("a", 1),
        WriteEvent::Remove("a"),
        WriteEvent::Upsert("a", 2),
      ]
    );
    assert_eq!(buffer.len(), 0);
    assert!(buffer.drain().is_empty());
  }
}
