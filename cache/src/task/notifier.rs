use crate::error::BuildError;
use crate::listener::{ListenerDelivery, RemovalCause, RemovalListener};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{bounded, Sender};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// A removal waiting to be reported.
pub(crate) struct Notification<K, V> {
  pub(crate) key: K,
  pub(crate) value: Option<Arc<V>>,
  pub(crate) cause: RemovalCause,
}

impl<K, V> Notification<K, V> {
  pub(crate) fn new(key: K, value: Option<Arc<V>>, cause: RemovalCause) -> Self {
    Self { key, value, cause }
  }
}

pub(crate) enum Message<K, V> {
  Removal(Notification<K, V>),
  Flush(Sender<()>),
}

/// Delivers removal notifications to the user's listener.
pub(crate) enum Notifier<K, V> {
  Inline(Arc<dyn RemovalListener<K, V>>),
  Background {
    sender: Sender<Message<K, V>>,
    thread_id: ThreadId,
    listener: Arc<dyn RemovalListener<K, V>>,
  },
}

fn deliver<K, V>(listener: &dyn RemovalListener<K, V>, notification: Notification<K, V>) {
  let Notification { key, value, cause } = notification;
  let result = catch_unwind(AssertUnwindSafe(|| listener.on_removal(key, value, cause)));
  if result.is_err() {
    tracing::error!(%cause, "removal listener panicked");
  }
}

impl<K, V> Notifier<K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  /// Creates a notifier, spawning the notifier thread for background delivery.
  pub(crate) fn spawn(
    listener: Arc<dyn RemovalListener<K, V>>,
    delivery: ListenerDelivery,
  ) -> Result<Self, BuildError> {
    match delivery {
      ListenerDelivery::Inline => Ok(Notifier::Inline(listener)),
      ListenerDelivery::Background => {
        let (tx, rx) = bounded::<Message<K, V>>(NOTIFICATION_CHANNEL_CAPACITY);
        let worker_listener = listener.clone();
        // The loop ends when the channel is disconnected, which happens when
        // the cache owning the sender is dropped.
        let handle = thread::Builder::new()
          .name("ferro-cache-notifier".into())
          .spawn(move || {
            for message in rx {
              match message {
                Message::Removal(notification) => deliver(&*worker_listener, notification),
                Message::Flush(done) => {
                  let _ = done.send(());
                }
              }
            }
            tracing::debug!("notifier thread exiting");
          })
          .map_err(|err| BuildError::ThreadSpawn(err.to_string()))?;

        Ok(Notifier::Background {
          sender: tx,
          thread_id: handle.thread().id(),
          listener,
        })
      }
    }
  }

  pub(crate) fn notify(&self, notification: Notification<K, V>) {
    match self {
      Notifier::Inline(listener) => deliver(&**listener, notification),
      Notifier::Background {
        sender,
        thread_id,
        listener,
      } => {
        // A listener that writes back into the cache runs on the notifier
        // thread; queueing from there could wait on a full channel forever.
        if thread::current().id() == *thread_id {
          deliver(&**listener, notification);
          return;
        }
        // Blocks when the channel is full rather than dropping the event.
        if sender.send(Message::Removal(notification)).is_err() {
          tracing::warn!("notifier thread is gone, dropping a removal notification");
        }
      }
    }
  }

  /// Waits until every notification queued so far has been delivered.
  /// A no-op for inline delivery or when called from the notifier thread.
  pub(crate) fn flush(&self) {
    if let Notifier::Background {
      sender, thread_id, ..
    } = self
    {
      if thread::current().id() == *thread_id {
        return;
      }
      let (done_tx, done_rx) = bounded(1);
      if sender.send(Message::Flush(done_tx)).is_ok() {
        let _ = done_rx.recv();
      }
    }
  }
}
