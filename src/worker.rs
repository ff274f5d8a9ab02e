//! One relay instance: every component wired together and owned explicitly.

use std::sync::{Arc, Mutex, PoisonError};

use color_eyre::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheGeneration, CacheStorage, CacheStore, WarmReport};
use crate::clock::Clock;
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, ConnectivityProbe};
use crate::control::{ControlMessage, ControlReply};
use crate::lifecycle::LifecycleController;
use crate::net::{RequestDescriptor, Served, TimeoutBoundedFetcher, Transport};
use crate::notify::NotificationHub;
use crate::proxy::{OfflinePlaceholder, RequestProxy, StrategySelector};
use crate::queue::OfflineQueue;

/// Background-sync tag that replays the offline queue.
pub const SYNC_TAG: &str = "sync-offline-requests";

/// The outside world a worker talks to.
pub struct Dependencies {
  pub transport: Arc<dyn Transport>,
  pub probe: Arc<dyn ConnectivityProbe>,
  pub storage: Arc<dyn CacheStorage>,
  pub clock: Arc<dyn Clock>,
  pub initially_online: bool,
}

pub struct Worker {
  hub: Arc<NotificationHub>,
  cache: Arc<CacheStore>,
  fetcher: Arc<TimeoutBoundedFetcher>,
  queue: Arc<OfflineQueue>,
  connectivity: Arc<ConnectivityMonitor>,
  lifecycle: LifecycleController,
  proxy: RequestProxy,
  polling: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
  /// Wire up every component from config. Nothing runs until [`Worker::start`].
  ///
  /// Fails only on config values that don't form valid URLs.
  pub fn new(config: &Config, deps: Dependencies) -> Result<Self> {
    let origin = config.origin_url()?;
    let hub = Arc::new(NotificationHub::new());

    let fetcher =
      Arc::new(TimeoutBoundedFetcher::new(deps.transport).with_timeout(config.network_timeout()));

    let cache = Arc::new(CacheStore::new(
      deps.storage,
      CacheGeneration::new(&config.cache.prefix, &config.cache.version),
      &config.api_prefix,
      deps.clock.clone(),
    ));

    let queue = Arc::new(
      OfflineQueue::new(hub.clone(), deps.clock.clone()).with_max_len(config.queue.max_len),
    );

    let connectivity = Arc::new(
      ConnectivityMonitor::new(
        deps.initially_online,
        deps.probe,
        queue.clone(),
        fetcher.clone(),
        hub.clone(),
        deps.clock.clone(),
      )
      .with_poll_interval(config.poll_interval()),
    );

    let lifecycle =
      LifecycleController::new(cache.clone(), fetcher.clone(), config.precache_urls()?)
        .with_skip_waiting(config.lifecycle.skip_waiting);

    let placeholder = OfflinePlaceholder::new(
      &config.api_prefix,
      &config.offline_message,
      config.resolve(&config.cache.shell)?,
      config.resolve("/")?,
      deps.clock,
    );

    let proxy = RequestProxy::new(
      origin,
      StrategySelector::new(&config.api_prefix),
      cache.clone(),
      fetcher.clone(),
      queue.clone(),
      connectivity.clone(),
      placeholder,
    );

    Ok(Self {
      hub,
      cache,
      fetcher,
      queue,
      connectivity,
      lifecycle,
      proxy,
      polling: Mutex::new(None),
    })
  }

  /// Hub carrying queue and connectivity notifications.
  pub fn notifications(&self) -> &Arc<NotificationHub> {
    &self.hub
  }

  pub fn cache(&self) -> &CacheStore {
    &self.cache
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.connectivity
  }

  pub fn lifecycle(&self) -> &LifecycleController {
    &self.lifecycle
  }

  /// Install (and activate, if configured), then start connectivity polling.
  pub async fn start(&self) -> WarmReport {
    let report = self.lifecycle.install().await;

    let handle = self.connectivity.clone().spawn_polling();
    let previous = self
      .polling
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(handle);
    if let Some(previous) = previous {
      previous.abort();
    }

    report
  }

  /// Stop connectivity polling. Also runs on drop.
  pub fn stop(&self) {
    if let Some(handle) = self
      .polling
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      handle.abort();
    }
  }

  /// Serve an intercepted request. Before activation requests go straight to the network.
  pub async fn handle_fetch(&self, request: &RequestDescriptor) -> crate::error::Result<Served> {
    if !self.lifecycle.is_controlling() {
      debug!(url = %request.url(), "not controlling yet, passing through");
      return self.proxy.passthrough(request).await;
    }
    self.proxy.handle(request).await
  }

  /// Returns a reply for the message kinds that expect one.
  pub async fn handle_control(&self, message: &ControlMessage) -> Option<ControlReply> {
    debug!(?message, "control message");
    match message {
      ControlMessage::SkipWaiting => {
        self.lifecycle.skip_waiting().await;
        None
      }
      ControlMessage::CheckOnlineStatus => Some(ControlReply::OnlineStatus {
        online: self.connectivity.is_online(),
      }),
      ControlMessage::ProcessQueue => {
        self.process_queue().await;
        None
      }
      ControlMessage::GetQueueSize => Some(ControlReply::QueueSize {
        queue_size: self.queue.size(),
      }),
      ControlMessage::Unknown => None,
    }
  }

  /// Background sync. Returns true when the tag was recognised.
  pub async fn handle_sync(&self, tag: &str) -> bool {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring unknown sync tag");
      return false;
    }
    self.process_queue().await;
    true
  }

  /// Platform connectivity push signal.
  pub async fn signal_connectivity(&self, online: bool) -> bool {
    self.connectivity.signal(online).await
  }

  /// Drain the queue unless known to be offline.
  async fn process_queue(&self) {
    if !self.connectivity.is_online() {
      info!(queued = self.queue.size(), "offline, leaving queue for later");
      return;
    }
    self.queue.drain_all(&self.fetcher).await;
  }
}

impl Drop for Worker {
  fn drop(&mut self) {
    self.stop();
  }
}
