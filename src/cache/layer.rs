//! The cache store: partitioned, versioned response cache on top of a storage backend.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::Clock;
use crate::error::RelayError;
use crate::net::{RequestDescriptor, ResponseRecord, TimeoutBoundedFetcher};

use super::generation::{CacheGeneration, PartitionKind};
use super::key::CacheKey;
use super::storage::CacheStorage;

/// Outcome of a best-effort warm-up.
#[derive(Debug, Default)]
pub struct WarmReport {
  pub cached: Vec<Url>,
  pub failed: Vec<(Url, String)>,
}

/// A stored record and the partition it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
  pub partition: String,
  pub record: ResponseRecord,
}

/// Cache store shared by the proxy, the background revalidation tasks and the
/// lifecycle controller.
///
/// Read failures count as misses and write failures are logged, never returned:
/// a caching problem must not fail the request that triggered it.
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  generation: CacheGeneration,
  api_prefix: String,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  /// Store for one generation. Requests under `api_prefix` are written to the API
  /// partition, everything else to the dynamic one.
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    generation: CacheGeneration,
    api_prefix: impl Into<String>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      storage,
      generation,
      api_prefix: api_prefix.into(),
      clock,
    }
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  /// Partition a network response for this request is written to.
  pub fn partition_for(&self, request: &RequestDescriptor) -> PartitionKind {
    if request.path().starts_with(&self.api_prefix) {
      PartitionKind::Api
    } else {
      PartitionKind::Dynamic
    }
  }

  /// Search every partition, in creation order, ignoring query strings.
  pub fn lookup(&self, request: &RequestDescriptor) -> Option<ResponseRecord> {
    self.lookup_url(request.url())
  }

  pub fn lookup_url(&self, url: &Url) -> Option<ResponseRecord> {
    self.find(url).map(|hit| hit.record)
  }

  /// Like [`CacheStore::lookup`], keeping track of where the record lives.
  pub fn lookup_hit(&self, request: &RequestDescriptor) -> Option<CacheHit> {
    self.find(request.url())
  }

  fn find(&self, url: &Url) -> Option<CacheHit> {
    let key = CacheKey::from_url(url);

    let partitions = match self.storage.partitions() {
      Ok(partitions) => partitions,
      Err(e) => {
        warn!(error = %e, "cache unavailable, treating lookup as a miss");
        return None;
      }
    };

    for partition in partitions {
      match self.storage.get(&partition, &key, true) {
        Ok(Some(record)) => {
          debug!(url = %key.url, %partition, "cache hit");
          return Some(CacheHit { partition, record });
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, %partition, "cache read failed"),
      }
    }

    debug!(url = %key.url, "cache miss");
    None
  }

  /// Store a response in one of the current generation's partitions.
  ///
  /// Returns whether the record was stored. Rejections are logged and swallowed.
  pub fn put(
    &self,
    kind: PartitionKind,
    request: &RequestDescriptor,
    response: &ResponseRecord,
  ) -> bool {
    let partition = self.generation.partition_name(kind);
    match self.try_put(&partition, request, response) {
      Ok(()) => {
        debug!(url = %request.url(), %partition, "cached");
        true
      }
      Err(e) => {
        warn!(error = %e, "failed to cache response");
        false
      }
    }
  }

  /// Store a response in the partition matching the request's namespace.
  pub fn put_for(&self, request: &RequestDescriptor, response: &ResponseRecord) -> bool {
    self.put(self.partition_for(request), request, response)
  }

  /// Overwrite the entry a hit came from, so the next lookup sees the fresh copy
  /// instead of the one it shadows.
  pub fn refresh(
    &self,
    hit: &CacheHit,
    request: &RequestDescriptor,
    response: &ResponseRecord,
  ) -> bool {
    match self.try_put(&hit.partition, request, response) {
      Ok(()) => {
        debug!(url = %request.url(), partition = %hit.partition, "refreshed");
        true
      }
      Err(e) => {
        warn!(error = %e, "failed to refresh cached response");
        false
      }
    }
  }

  fn try_put(
    &self,
    partition: &str,
    request: &RequestDescriptor,
    response: &ResponseRecord,
  ) -> Result<(), RelayError> {
    let reject = |reason: &str| RelayError::CacheWrite {
      partition: partition.to_string(),
      url: request.url().to_string(),
      reason: reason.to_string(),
    };

    if *request.method() != reqwest::Method::GET {
      return Err(reject("only GET responses can be cached"));
    }
    if response.status == 206 {
      return Err(reject("partial content"));
    }
    if response.header("vary").is_some_and(|v| v.trim() == "*") {
      return Err(reject("Vary: *"));
    }

    let mut record = response.clone();
    record.stored_at = Some(self.clock.now());

    self
      .storage
      .put(partition, &CacheKey::from_url(request.url()), &record)
      .map_err(|e| reject(&e.to_string()))
  }

  /// Remove one URL from a partition of the current generation.
  pub fn delete(&self, kind: PartitionKind, url: &Url) -> bool {
    let partition = self.generation.partition_name(kind);
    self
      .storage
      .delete(&partition, &CacheKey::from_url(url))
      .unwrap_or_else(|e| {
        warn!(error = %e, %partition, "cache delete failed");
        false
      })
  }

  /// URLs stored in a partition of the current generation.
  pub fn entries(&self, kind: PartitionKind) -> Vec<String> {
    let partition = self.generation.partition_name(kind);
    self.storage.keys(&partition).unwrap_or_else(|e| {
      warn!(error = %e, %partition, "cache enumerate failed");
      Vec::new()
    })
  }

  /// Every partition the backend holds, any generation.
  pub fn partitions(&self) -> Vec<String> {
    self.storage.partitions().unwrap_or_else(|e| {
      warn!(error = %e, "cache enumerate failed");
      Vec::new()
    })
  }

  /// Delete every partition not named in `keep`. Returns the deleted names.
  pub fn evict_generations_except(&self, keep: &[String]) -> Vec<String> {
    let mut evicted = Vec::new();

    for partition in self.partitions() {
      if keep.contains(&partition) {
        continue;
      }
      match self.storage.delete_partition(&partition) {
        Ok(_) => {
          info!(%partition, "deleted old cache partition");
          evicted.push(partition);
        }
        Err(e) => warn!(error = %e, %partition, "failed to delete old cache partition"),
      }
    }

    evicted
  }

  /// Best-effort population of the static partition.
  ///
  /// Every URL is fetched independently; one failure never aborts the others.
  pub async fn warm(&self, fetcher: &TimeoutBoundedFetcher, urls: &[Url]) -> WarmReport {
    let partition = self.generation.partition_name(PartitionKind::Static);
    if let Err(e) = self.storage.open_partition(&partition) {
      warn!(error = %e, %partition, "failed to open static partition");
    }

    let attempts = urls.iter().map(|url| async move {
      let request = RequestDescriptor::get(url.clone());
      let outcome = match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if self.put(PartitionKind::Static, &request, &response) {
            Ok(())
          } else {
            Err("rejected by cache".to_string())
          }
        }
        Ok(response) => Err(format!("HTTP {}", response.status)),
        Err(e) => Err(e.to_string()),
      };
      (url.clone(), outcome)
    });

    let mut report = WarmReport::default();
    for (url, outcome) in join_all(attempts).await {
      match outcome {
        Ok(()) => report.cached.push(url),
        Err(reason) => {
          warn!(%url, %reason, "failed to precache");
          report.failed.push((url, reason));
        }
      }
    }
    report
  }
}
