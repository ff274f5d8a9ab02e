//! Online/offline tracking.
//!
//! Platform push signals are unreliable, so the monitor also polls a probe and accepts
//! explicit status reports from the proxy. Whatever the source, a transition is only
//! acted on once: Offline -> Online broadcasts and drains the offline queue,
//! Online -> Offline only broadcasts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use crate::clock::Clock;
use crate::net::TimeoutBoundedFetcher;
use crate::notify::{Notification, NotificationHub};
use crate::queue::OfflineQueue;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// A connectivity reading. Only the monitor mutates it; everyone else gets copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
  pub online: bool,
  pub observed_at: DateTime<Utc>,
}

/// What produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
  /// Push signal from the platform/host
  Platform,
  /// Periodic probe
  Poll,
  /// Status relayed by the proxy layer
  Report,
}

/// Platform-reported connectivity, queried on every poll.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
  async fn is_online(&self) -> bool;
}

/// Probe that considers the network reachable when a HEAD request gets any response.
pub struct HttpProbe {
  client: Client,
  url: Url,
  timeout: Duration,
}

impl HttpProbe {
  /// Probe `url`, treating no answer within `timeout` as offline.
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    let client = Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create probe client: {}", e))?;

    Ok(Self {
      client,
      url,
      timeout,
    })
  }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
  async fn is_online(&self) -> bool {
    self
      .client
      .head(self.url.clone())
      .timeout(self.timeout)
      .send()
      .await
      .is_ok()
  }
}

pub struct ConnectivityMonitor {
  state: Mutex<ConnectivityState>,
  probe: Arc<dyn ConnectivityProbe>,
  queue: Arc<OfflineQueue>,
  fetcher: Arc<TimeoutBoundedFetcher>,
  hub: Arc<NotificationHub>,
  clock: Arc<dyn Clock>,
  poll_interval: Duration,
}

impl ConnectivityMonitor {
  /// Start from `initially_online` until a reading says otherwise.
  ///
  /// Coming back online drains `queue` through `fetcher`; every transition is
  /// broadcast on `hub`.
  pub fn new(
    initially_online: bool,
    probe: Arc<dyn ConnectivityProbe>,
    queue: Arc<OfflineQueue>,
    fetcher: Arc<TimeoutBoundedFetcher>,
    hub: Arc<NotificationHub>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let state = ConnectivityState {
      online: initially_online,
      observed_at: clock.now(),
    };

    Self {
      state: Mutex::new(state),
      probe,
      queue,
      fetcher,
      hub,
      clock,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  /// Interval for [`ConnectivityMonitor::spawn_polling`] (default 3s).
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  /// Last reading and when it was taken.
  pub fn snapshot(&self) -> ConnectivityState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Last known reachability. Never blocks on the network.
  pub fn is_online(&self) -> bool {
    self.snapshot().online
  }

  /// Push signal from the platform.
  pub async fn signal(&self, online: bool) -> bool {
    self.apply(online, SignalSource::Platform).await
  }

  /// Explicit status relayed by the proxy layer.
  pub async fn report(&self, online: bool) -> bool {
    self.apply(online, SignalSource::Report).await
  }

  /// Compare the probe's reading against the last known state.
  pub async fn poll_once(&self) -> bool {
    let online = self.probe.is_online().await;
    self.apply(online, SignalSource::Poll).await
  }

  /// Record a reading. Returns true when it was a transition.
  async fn apply(&self, online: bool, source: SignalSource) -> bool {
    let previous = {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      let previous = state.online;
      *state = ConnectivityState {
        online,
        observed_at: self.clock.now(),
      };
      previous
    };

    if previous == online {
      debug!(online, ?source, "connectivity unchanged");
      return false;
    }

    self.hub.broadcast(&Notification::OnlineStatusChanged { online });

    if online {
      info!(?source, queued = self.queue.size(), "back online, processing queue");
      self.queue.drain_all(&self.fetcher).await;
    } else {
      info!(?source, "went offline");
    }
    true
  }

  /// Poll the probe every interval until the returned task is aborted.
  pub fn spawn_polling(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.poll_interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        self.poll_once().await;
      }
    })
  }
}
