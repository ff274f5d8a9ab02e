//! Install/activate lifecycle governing cache population and generation cutover.
//!
//! New -> Installing -> Installed -> Activating -> Active, and Redundant once a newer
//! instance has taken over. A newer instance may install while an older one is still
//! Active; only its activation evicts the older generation's partitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStore, WarmReport};
use crate::net::TimeoutBoundedFetcher;

/// Where an instance is in its install/activate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  New,
  Installing,
  Installed,
  Activating,
  Active,
  Redundant,
}

pub struct LifecycleController {
  cache: Arc<CacheStore>,
  fetcher: Arc<TimeoutBoundedFetcher>,
  precache: Vec<Url>,
  skip_waiting: bool,
  state: Mutex<LifecycleState>,
  controlling: AtomicBool,
}

impl LifecycleController {
  /// A fresh instance in the `New` state that will warm `precache` on install.
  pub fn new(cache: Arc<CacheStore>, fetcher: Arc<TimeoutBoundedFetcher>, precache: Vec<Url>) -> Self {
    Self {
      cache,
      fetcher,
      precache,
      skip_waiting: true,
      state: Mutex::new(LifecycleState::New),
      controlling: AtomicBool::new(false),
    }
  }

  /// Whether installation advances straight to activation.
  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  /// Current state.
  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: LifecycleState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    debug!(?state, "lifecycle");
  }

  /// Compare-and-set; false when the current state isn't `from`.
  fn advance(&self, from: LifecycleState, to: LifecycleState) -> bool {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state != from {
      return false;
    }
    *state = to;
    debug!(state = ?to, "lifecycle");
    true
  }

  /// True once activation has claimed in-flight traffic.
  pub fn is_controlling(&self) -> bool {
    self.controlling.load(Ordering::SeqCst)
  }

  /// Warm the static partition. Partial failures don't stop installation.
  pub async fn install(&self) -> WarmReport {
    if !self.advance(LifecycleState::New, LifecycleState::Installing) {
      debug!(state = ?self.state(), "install ignored");
      return WarmReport::default();
    }

    info!(
      version = self.cache.generation().version(),
      assets = self.precache.len(),
      "installing"
    );
    let report = self.cache.warm(&self.fetcher, &self.precache).await;
    self.set_state(LifecycleState::Installed);
    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "installed"
    );

    if self.skip_waiting {
      self.activate().await;
    }
    report
  }

  /// Evict every partition outside the current generation, then claim traffic.
  /// Returns the evicted partition names.
  pub async fn activate(&self) -> Vec<String> {
    if !self.advance(LifecycleState::Installed, LifecycleState::Activating) {
      debug!(state = ?self.state(), "activate ignored");
      return Vec::new();
    }

    let keep = self.cache.generation().partition_names();
    let evicted = self.cache.evict_generations_except(&keep);

    self.set_state(LifecycleState::Active);
    self.controlling.store(true, Ordering::SeqCst);
    info!(evicted = evicted.len(), "activated and controlling traffic");
    evicted
  }

  /// Force-advance an installed instance to active ("reload now" updates).
  /// Returns false when there was nothing waiting.
  pub async fn skip_waiting(&self) -> bool {
    if self.state() != LifecycleState::Installed {
      return false;
    }
    self.activate().await;
    self.state() == LifecycleState::Active
  }

  /// Step aside for a newer instance.
  pub fn retire(&self) {
    self.controlling.store(false, Ordering::SeqCst);
    self.set_state(LifecycleState::Redundant);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheGeneration, CacheStorage, MemoryStorage, PartitionKind};
  use crate::net::{RequestDescriptor, ResponseRecord};
  use crate::testing::{url, FixedClock, ScriptedTransport};

  fn store(storage: Arc<dyn CacheStorage>, version: &str) -> Arc<CacheStore> {
    Arc::new(CacheStore::new(
      storage,
      CacheGeneration::new("relay", version),
      "/api/",
      Arc::new(FixedClock::at_millis(0)),
    ))
  }

  fn controller(cache: Arc<CacheStore>, transport: Arc<ScriptedTransport>) -> LifecycleController {
    let fetcher = Arc::new(TimeoutBoundedFetcher::new(transport));
    LifecycleController::new(cache, fetcher, vec![url("/"), url("/index.html")])
  }

  #[tokio::test]
  async fn test_install_tolerates_failures_and_activates() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/", ResponseRecord::new(200).with_body("root"));
    transport.fail("/index.html");
    let cache = store(Arc::new(MemoryStorage::new()), "v1");
    let lifecycle = controller(cache.clone(), transport);

    let report = lifecycle.install().await;

    assert_eq!(report.cached, vec![url("/")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert!(lifecycle.is_controlling());
    assert_eq!(cache.entries(PartitionKind::Static).len(), 1);
  }

  #[tokio::test]
  async fn test_waiting_instance_needs_skip_waiting() {
    let transport = Arc::new(ScriptedTransport::new());
    let cache = store(Arc::new(MemoryStorage::new()), "v1");
    let lifecycle = controller(cache, transport).with_skip_waiting(false);

    lifecycle.install().await;
    assert_eq!(lifecycle.state(), LifecycleState::Installed);
    assert!(!lifecycle.is_controlling());

    assert!(lifecycle.skip_waiting().await);
    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert!(lifecycle.is_controlling());

    // Nothing left to advance
    assert!(!lifecycle.skip_waiting().await);
  }

  #[tokio::test]
  async fn test_install_runs_once() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/", ResponseRecord::new(200));
    let cache = store(Arc::new(MemoryStorage::new()), "v1");
    let lifecycle = controller(cache, transport.clone());

    lifecycle.install().await;
    let second = lifecycle.install().await;

    assert!(second.cached.is_empty());
    assert_eq!(transport.call_count("/"), 1);
  }

  #[tokio::test]
  async fn test_update_in_place_evicts_previous_generation() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/", ResponseRecord::new(200).with_body("root"));
    transport.respond("/index.html", ResponseRecord::new(200).with_body("shell"));

    let old_cache = store(storage.clone(), "v1");
    let old = controller(old_cache.clone(), transport.clone());
    old.install().await;
    old_cache.put(
      PartitionKind::Dynamic,
      &RequestDescriptor::get(url("/d1")),
      &ResponseRecord::new(200),
    );
    old_cache.put(
      PartitionKind::Api,
      &RequestDescriptor::get(url("/api/a1")),
      &ResponseRecord::new(200),
    );

    // New instance installs while the old one is still active
    let new_cache = store(storage.clone(), "v2");
    let new = controller(new_cache.clone(), transport).with_skip_waiting(false);
    new.install().await;
    assert_eq!(old.state(), LifecycleState::Active);
    assert!(new_cache.lookup_url(&url("/d1")).is_some());

    let mut evicted = new.activate().await;
    old.retire();
    evicted.sort();

    assert_eq!(
      evicted,
      vec!["relay-api-v1", "relay-dynamic-v1", "relay-static-v1"]
    );
    assert_eq!(old.state(), LifecycleState::Redundant);
    assert!(!old.is_controlling());
    assert!(new_cache.lookup_url(&url("/d1")).is_none());
    assert!(new_cache.lookup_url(&url("/api/a1")).is_none());
    assert_eq!(
      new_cache.lookup_url(&url("/index.html")).unwrap().body,
      b"shell"
    );
    assert_eq!(storage.partitions().unwrap(), vec!["relay-static-v2"]);
  }
}
