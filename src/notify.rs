//! Publish/subscribe fan-out from the proxy, queue and connectivity monitor to observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Notifications broadcast to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
  OfflineRequestQueued {
    #[serde(rename = "queueSize")]
    queue_size: usize,
  },
  OfflineQueueProcessed {
    #[serde(rename = "queueSize")]
    queue_size: usize,
  },
  OnlineStatusChanged { online: bool },
}

/// Handle returned by [`NotificationHub::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
pub struct NotificationHub {
  next_id: AtomicU64,
  subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl NotificationHub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a callback invoked synchronously on every broadcast.
  pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
  where
    F: Fn(&Notification) + Send + Sync + 'static,
  {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
    if let Ok(mut subscribers) = self.subscribers.lock() {
      subscribers.push((id, Arc::new(callback)));
    }
    id
  }

  /// Subscribe through an unbounded channel instead of a callback.
  pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.subscribe(move |notification| {
      // Receiver gone; the owner is expected to unsubscribe
      let _ = tx.send(notification.clone());
    });
    (id, rx)
  }

  /// Returns false when the id was not subscribed.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    match self.subscribers.lock() {
      Ok(mut subscribers) => {
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
      }
      Err(_) => false,
    }
  }

  /// Deliver to every subscriber, in subscription order.
  pub fn broadcast(&self, notification: &Notification) {
    // Snapshot so callbacks can subscribe/unsubscribe without deadlocking
    let callbacks: Vec<Callback> = match self.subscribers.lock() {
      Ok(subscribers) => subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
      Err(e) => {
        warn!(error = %e, "notification registry poisoned, dropping broadcast");
        return;
      }
    };

    for callback in callbacks {
      callback(notification);
    }
  }
}
