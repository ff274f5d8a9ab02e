//! Queue of mutating requests that failed for lack of connectivity, replayed later.
//!
//! Delivery is eventual, not ordered: a replay that fails again goes to the back of
//! the queue rather than keeping its place.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::RelayError;
use crate::net::{RequestDescriptor, TimeoutBoundedFetcher};
use crate::notify::{Notification, NotificationHub};

/// Default cap on queued requests.
pub const DEFAULT_MAX_LEN: usize = 500;

/// A captured request waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
  pub id: u64,
  pub request: RequestDescriptor,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far
  pub attempts: u32,
}

/// Result of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replays that reached the origin (any status)
  pub replayed: usize,
  /// Replays that failed and went back on the queue
  pub requeued: usize,
  /// Queue length once the drain finished
  pub remaining: usize,
}

pub struct OfflineQueue {
  entries: Mutex<VecDeque<QueuedRequest>>,
  next_id: AtomicU64,
  max_len: usize,
  hub: Arc<NotificationHub>,
  clock: Arc<dyn Clock>,
}

impl OfflineQueue {
  /// Empty queue capped at [`DEFAULT_MAX_LEN`]. Queue changes are announced on `hub`.
  pub fn new(hub: Arc<NotificationHub>, clock: Arc<dyn Clock>) -> Self {
    Self {
      entries: Mutex::new(VecDeque::new()),
      next_id: AtomicU64::new(1),
      max_len: DEFAULT_MAX_LEN,
      hub,
      clock,
    }
  }

  /// Cap the queue; enqueueing into a full queue drops the oldest entry.
  pub fn with_max_len(mut self, max_len: usize) -> Self {
    self.max_len = max_len.max(1);
    self
  }

  fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedRequest>> {
    // Entries are whole values; a panic elsewhere can't leave one half-written
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn push_capped(&self, entry: QueuedRequest) -> usize {
    let mut entries = self.lock();
    while entries.len() >= self.max_len {
      if let Some(dropped) = entries.pop_front() {
        warn!(
          url = %dropped.request.url(),
          max_len = self.max_len,
          "offline queue full, dropping oldest request"
        );
      }
    }
    entries.push_back(entry);
    entries.len()
  }

  /// Append a request and tell observers the new queue length.
  pub fn enqueue(&self, request: RequestDescriptor) -> usize {
    let entry = QueuedRequest {
      id: self.next_id.fetch_add(1, Ordering::Relaxed),
      request,
      enqueued_at: self.clock.now(),
      attempts: 0,
    };
    let url = entry.request.url().to_string();
    let queue_size = self.push_capped(entry);

    info!(%url, queue_size, "request queued for retry");
    self
      .hub
      .broadcast(&Notification::OfflineRequestQueued { queue_size });
    queue_size
  }

  /// Number of requests waiting for replay.
  pub fn size(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Copy of the queued entries, oldest first.
  pub fn snapshot(&self) -> Vec<QueuedRequest> {
    self.lock().iter().cloned().collect()
  }

  /// Replay everything currently queued.
  ///
  /// The queue is snapshotted and cleared in one step, so overlapping drains never
  /// replay the same entry twice. Entries are replayed one at a time; a failure puts
  /// the entry back at the tail and the drain carries on.
  pub async fn drain_all(&self, fetcher: &TimeoutBoundedFetcher) -> DrainReport {
    let batch: Vec<QueuedRequest> = std::mem::take(&mut *self.lock()).into();

    if batch.is_empty() {
      debug!("offline queue empty, nothing to replay");
      return DrainReport {
        remaining: self.size(),
        ..DrainReport::default()
      };
    }

    info!(count = batch.len(), "processing offline queue");
    let mut report = DrainReport::default();

    for mut entry in batch {
      match fetcher.fetch(&entry.request).await {
        Ok(response) => {
          report.replayed += 1;
          if response.is_success() {
            info!(url = %entry.request.url(), "offline request synced");
          } else {
            warn!(
              url = %entry.request.url(),
              status = response.status,
              "offline request replayed but rejected by origin"
            );
          }
        }
        Err(e) => {
          let err = RelayError::QueueReplay {
            url: entry.request.url().to_string(),
            reason: e.to_string(),
          };
          warn!(error = %err, attempts = entry.attempts + 1, "re-queueing");
          entry.attempts += 1;
          self.push_capped(entry);
          report.requeued += 1;
        }
      }
    }

    report.remaining = self.size();
    self.hub.broadcast(&Notification::OfflineQueueProcessed {
      queue_size: report.remaining,
    });
    report
  }
}
