//! The intercepting proxy: runs cache-first or network-first for each request and
//! queues mutating requests that can't reach the network.

use std::sync::Arc;

use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::cache::{CacheHit, CacheStore};
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::net::{RequestDescriptor, ResponseSource, Served, TimeoutBoundedFetcher};
use crate::queue::OfflineQueue;

use super::placeholder::OfflinePlaceholder;
use super::strategy::{Strategy, StrategySelector};

pub struct RequestProxy {
  origin: Url,
  selector: StrategySelector,
  cache: Arc<CacheStore>,
  fetcher: Arc<TimeoutBoundedFetcher>,
  queue: Arc<OfflineQueue>,
  connectivity: Arc<ConnectivityMonitor>,
  placeholder: OfflinePlaceholder,
}

impl RequestProxy {
  /// Build a proxy for `origin`. The cache, fetcher, queue and monitor are shared
  /// with the rest of the worker.
  pub fn new(
    origin: Url,
    selector: StrategySelector,
    cache: Arc<CacheStore>,
    fetcher: Arc<TimeoutBoundedFetcher>,
    queue: Arc<OfflineQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    placeholder: OfflinePlaceholder,
  ) -> Self {
    Self {
      origin,
      selector,
      cache,
      fetcher,
      queue,
      connectivity,
      placeholder,
    }
  }

  /// Requests to other origins are left alone unless they target the API namespace.
  pub fn in_scope(&self, request: &RequestDescriptor) -> bool {
    request.url().origin() == self.origin.origin() || self.selector.is_api(request)
  }

  /// Serve a request.
  ///
  /// Only pass-through requests can fail; everything the proxy controls resolves to
  /// a network, cache or placeholder response.
  pub async fn handle(&self, request: &RequestDescriptor) -> Result<Served> {
    if !self.in_scope(request) {
      return self.passthrough(request).await;
    }

    if *request.method() != Method::GET {
      return Ok(self.send_direct(request).await);
    }

    let online = self.connectivity.is_online();
    let strategy = self.selector.select(request, online);
    debug!(path = request.path(), ?strategy, online, "fetch");

    Ok(match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
    })
  }

  /// Straight to the network: no cache, no queue.
  pub async fn passthrough(&self, request: &RequestDescriptor) -> Result<Served> {
    let response = self.fetcher.fetch(request).await?;
    self.saw_network();
    Ok(Served::new(response, ResponseSource::Passthrough))
  }

  /// Non-GET requests skip strategy selection and the cache entirely.
  async fn send_direct(&self, request: &RequestDescriptor) -> Served {
    match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.saw_network();
        Served::network(response)
      }
      Err(e) => {
        debug!(method = %request.method(), url = %request.url(), error = %e, "request failed");
        if request.is_mutating() {
          self.queue.enqueue(request.clone());
        }
        self.placeholder.respond(request, &self.cache)
      }
    }
  }

  async fn cache_first(&self, request: &RequestDescriptor) -> Served {
    if let Some(hit) = self.cache.lookup_hit(request) {
      let response = hit.record.clone();
      if self.connectivity.is_online() {
        self.revalidate(request, hit);
      }
      return Served::cache(response);
    }

    if self.connectivity.is_online() {
      return self.network_first(request).await;
    }

    if let Some(shell) = self.navigation_shell(request) {
      return shell;
    }
    self.placeholder.respond(request, &self.cache)
  }

  /// Only GET requests get here; writes go through `send_direct`.
  async fn network_first(&self, request: &RequestDescriptor) -> Served {
    let error = match self.fetcher.fetch(request).await {
      Ok(response) => {
        self.saw_network();
        if response.is_success() {
          self.cache.put_for(request, &response);
        }
        return Served::network(response);
      }
      Err(e) => e,
    };

    debug!(url = %request.url(), error = %error, "network failed, trying cache");

    if let Some(cached) = self.cache.lookup(request) {
      return Served::cache(cached);
    }

    if let Some(shell) = self.navigation_shell(request) {
      return shell;
    }

    self.placeholder.respond(request, &self.cache)
  }

  fn navigation_shell(&self, request: &RequestDescriptor) -> Option<Served> {
    if !request.is_navigation() {
      return None;
    }
    self
      .cache
      .lookup_url(self.placeholder.shell_url())
      .map(|shell| Served::new(shell, ResponseSource::Shell))
  }

  /// Stale-while-revalidate: refresh the cached copy in a detached task whose only
  /// effect is a cache write, into the partition the hit was served from.
  fn revalidate(&self, request: &RequestDescriptor, hit: CacheHit) {
    let cache = Arc::clone(&self.cache);
    let fetcher = Arc::clone(&self.fetcher);
    let request = request.clone();

    tokio::spawn(async move {
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          cache.refresh(&hit, &request, &response);
        }
        Ok(response) => {
          debug!(url = %request.url(), status = response.status, "revalidation not cached")
        }
        Err(e) => debug!(url = %request.url(), error = %e, "background revalidation failed"),
      }
    });
  }

  /// A network response proves reachability; relay that to the monitor.
  fn saw_network(&self) {
    if self.connectivity.is_online() {
      return;
    }
    let monitor = Arc::clone(&self.connectivity);
    tokio::spawn(async move {
      monitor.report(true).await;
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheGeneration, MemoryStorage, PartitionKind};
  use crate::net::{RequestMode, ResponseRecord};
  use crate::notify::NotificationHub;
  use crate::proxy::OfflinePlaceholder;
  use crate::testing::{url, FixedClock, ScriptedTransport, StaticProbe};
  use std::time::Duration;
  use tokio::time::Instant;

  struct Fixture {
    transport: Arc<ScriptedTransport>,
    cache: Arc<CacheStore>,
    queue: Arc<OfflineQueue>,
    monitor: Arc<ConnectivityMonitor>,
    proxy: RequestProxy,
  }

  fn fixture(online: bool) -> Fixture {
    let clock = Arc::new(FixedClock::at_millis(0));
    let hub = Arc::new(NotificationHub::new());
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_online(online);
    let fetcher = Arc::new(TimeoutBoundedFetcher::new(transport.clone()));
    let cache = Arc::new(CacheStore::new(
      Arc::new(MemoryStorage::new()),
      CacheGeneration::new("relay", "v1"),
      "/api/",
      clock.clone(),
    ));
    let queue = Arc::new(OfflineQueue::new(hub.clone(), clock.clone()));
    let monitor = Arc::new(ConnectivityMonitor::new(
      online,
      Arc::new(StaticProbe::new(online)),
      queue.clone(),
      fetcher.clone(),
      hub,
      clock.clone(),
    ));
    let placeholder =
      OfflinePlaceholder::new("/api/", "offline", url("/index.html"), url("/"), clock);
    let proxy = RequestProxy::new(
      url("/"),
      StrategySelector::new("/api/"),
      cache.clone(),
      fetcher,
      queue.clone(),
      monitor.clone(),
      placeholder,
    );

    Fixture {
      transport,
      cache,
      queue,
      monitor,
      proxy,
    }
  }

  fn ok(body: &str) -> ResponseRecord {
    ResponseRecord::new(200).with_body(body)
  }

  fn seed(f: &Fixture, path: &str, body: &str) {
    f.cache.put_for(&RequestDescriptor::get(url(path)), &ok(body));
  }

  #[tokio::test]
  async fn test_cache_hit_offline_skips_network() {
    let f = fixture(false);
    seed(&f, "/assets/app.abc123.js", "console.log(1)");

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/assets/app.abc123.js")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"console.log(1)");
    assert!(f.transport.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cache_hit_online_does_not_wait_for_network() {
    let f = fixture(true);
    seed(&f, "/app.js", "old");
    f.transport
      .delay("/app.js", Duration::from_secs(1), ok("new"));

    let started = Instant::now();
    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/app.js")))
      .await
      .unwrap();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(served.response.body, b"old");

    // The detached refresh lands later
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(f.cache.lookup_url(&url("/app.js")).unwrap().body, b"new");
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_revalidation_keeps_cached_copy() {
    let f = fixture(true);
    seed(&f, "/app.js", "old");
    f.transport
      .respond("/app.js", ResponseRecord::new(500).with_body("boom"));

    f.proxy
      .handle(&RequestDescriptor::get(url("/app.js")))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(f.cache.lookup_url(&url("/app.js")).unwrap().body, b"old");
  }

  #[tokio::test(start_paused = true)]
  async fn test_revalidated_precached_asset_is_visible() {
    let f = fixture(true);
    f.cache.put(
      PartitionKind::Static,
      &RequestDescriptor::get(url("/manifest.json")),
      &ok("v1"),
    );
    f.transport.respond("/manifest.json", ok("v2"));

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/manifest.json")))
      .await
      .unwrap();
    assert_eq!(served.response.body, b"v1");

    tokio::time::sleep(Duration::from_millis(10)).await;
    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/manifest.json")))
      .await
      .unwrap();
    assert_eq!(served.response.body, b"v2");
    assert!(f.cache.entries(PartitionKind::Dynamic).is_empty());
  }

  #[tokio::test]
  async fn test_cache_miss_online_goes_to_network_and_caches() {
    let f = fixture(true);
    f.transport.respond("/manifest.json", ok("{}"));

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/manifest.json")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(
      f.cache.entries(PartitionKind::Dynamic),
      vec![url("/manifest.json").to_string()]
    );
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_document_shell() {
    let f = fixture(false);
    seed(&f, "/index.html", "<html>shell</html>");

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/orders/42")).with_mode(RequestMode::Navigate))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Shell);
    assert_eq!(served.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_offline_subresource_miss_gets_placeholder() {
    let f = fixture(false);

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/img/missing.png")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Placeholder);
    assert!(f.transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_network_first_returns_error_status_unmodified_and_uncached() {
    let f = fixture(true);
    f.transport.respond(
      "/api/v1/orders",
      ResponseRecord::new(500).with_body("server error"),
    );

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/api/v1/orders")))
      .await
      .unwrap();

    assert_eq!(served.response.status, 500);
    assert_eq!(served.response.body, b"server error");
    assert!(f.cache.entries(PartitionKind::Api).is_empty());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let f = fixture(true);
    f.transport.respond("/api/v1/orders", ok("[1]"));
    let request = RequestDescriptor::get(url("/api/v1/orders?page=1"));

    f.proxy.handle(&request).await.unwrap();
    assert_eq!(f.cache.entries(PartitionKind::Api).len(), 1);

    f.transport.fail("/api/v1/orders");
    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/api/v1/orders?page=2")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"[1]");
    assert_eq!(f.queue.size(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_network_response_is_discarded() {
    let f = fixture(true);
    f.transport
      .delay("/api/v1/slow", Duration::from_secs(8), ok("late"));

    let started = Instant::now();
    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/api/v1/slow")))
      .await
      .unwrap();

    assert_eq!(started.elapsed(), crate::net::DEFAULT_TIMEOUT);
    assert_eq!(served.source, ResponseSource::Placeholder);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(f.cache.lookup_url(&url("/api/v1/slow")).is_none());
  }

  #[tokio::test]
  async fn test_offline_post_is_queued_with_body() {
    let f = fixture(false);
    let request = RequestDescriptor::new(Method::POST, url("/api/v1/orders"))
      .with_header("content-type", "application/json")
      .with_body(r#"{"item":"tomato"}"#);

    let served = f.proxy.handle(&request).await.unwrap();

    assert_eq!(served.response.status, 503);
    assert_eq!(f.transport.call_count("/api/v1/orders"), 1);
    let queued = f.queue.snapshot();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request.body(), Some(&br#"{"item":"tomato"}"#[..]));
    assert!(f.cache.lookup(&request).is_none());
  }

  #[tokio::test]
  async fn test_online_post_is_not_queued_or_cached() {
    let f = fixture(true);
    f.transport
      .respond("/api/v1/orders", ResponseRecord::new(201).with_body("{}"));

    let served = f
      .proxy
      .handle(&RequestDescriptor::new(Method::POST, url("/api/v1/orders")).with_body("{}"))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.status, 201);
    assert!(f.queue.is_empty());
    assert!(f.cache.entries(PartitionKind::Api).is_empty());
  }

  #[tokio::test]
  async fn test_failed_api_get_is_not_queued() {
    let f = fixture(true);
    f.transport.fail("/api/v1/orders");

    let served = f
      .proxy
      .handle(&RequestDescriptor::get(url("/api/v1/orders")))
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Placeholder);
    assert_eq!(served.response.status, 503);
    assert!(f.queue.is_empty());
  }

  #[tokio::test]
  async fn test_failed_head_is_not_queued() {
    let f = fixture(false);

    f.proxy
      .handle(&RequestDescriptor::new(Method::HEAD, url("/api/v1/orders")))
      .await
      .unwrap();

    assert!(f.queue.is_empty());
  }

  #[tokio::test]
  async fn test_foreign_origin_passes_through() {
    let f = fixture(true);
    let request = RequestDescriptor::get(Url::parse("https://cdn.example.com/lib.js").unwrap());

    let served = f.proxy.handle(&request).await.unwrap();
    assert_eq!(served.source, ResponseSource::Passthrough);
    assert!(f.cache.lookup(&request).is_none());

    f.transport.set_online(false);
    assert!(f.proxy.handle(&request).await.is_err());

    // Foreign origin under the API namespace is still handled
    let api = RequestDescriptor::get(Url::parse("https://cdn.example.com/api/x").unwrap());
    assert!(f.proxy.in_scope(&api));
  }

  #[tokio::test]
  async fn test_network_success_reports_online() {
    let f = fixture(false);
    f.transport.set_online(true);
    f.transport.respond("/api/v1/orders", ok("[]"));

    f.proxy
      .handle(&RequestDescriptor::get(url("/api/v1/orders")))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(f.monitor.is_online());
  }
}
