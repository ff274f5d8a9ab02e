//! Responses synthesized when neither the network nor the cache can answer.

use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::net::{RequestDescriptor, ResponseRecord, ResponseSource, Served};

pub const OFFLINE_HEADER: &str = "x-offline-mode";

pub const DEFAULT_MESSAGE: &str = "The request will be synchronized when you are back online";

#[derive(Serialize)]
struct OfflineBody<'a> {
  offline: bool,
  message: &'a str,
  timestamp: i64,
}

pub struct OfflinePlaceholder {
  api_prefix: String,
  message: String,
  shell_url: Url,
  root_url: Url,
  clock: Arc<dyn Clock>,
}

impl OfflinePlaceholder {
  /// `shell_url` is the cached page documents fall back to when offline.
  pub fn new(
    api_prefix: impl Into<String>,
    message: impl Into<String>,
    shell_url: Url,
    root_url: Url,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      api_prefix: api_prefix.into(),
      message: message.into(),
      shell_url,
      root_url,
      clock,
    }
  }

  pub fn shell_url(&self) -> &Url {
    &self.shell_url
  }

  /// API requests get a 503 JSON body. Everything else gets the cached document
  /// shell, else the cached root, else a bare 503.
  pub fn respond(&self, request: &RequestDescriptor, cache: &CacheStore) -> Served {
    if request.path().starts_with(&self.api_prefix) {
      return Served::new(self.api_response(), ResponseSource::Placeholder);
    }

    let response = cache
      .lookup_url(&self.shell_url)
      .or_else(|| cache.lookup_url(&self.root_url))
      .unwrap_or_else(|| {
        ResponseRecord::new(503)
          .with_header("content-type", "text/plain; charset=utf-8")
          .with_header(OFFLINE_HEADER, "true")
          .with_body(self.message.as_bytes().to_vec())
      });

    Served::new(response, ResponseSource::Placeholder)
  }

  fn api_response(&self) -> ResponseRecord {
    let body = OfflineBody {
      offline: true,
      message: &self.message,
      timestamp: self.clock.now().timestamp_millis(),
    };
    // Serializing a struct of plain fields can't fail
    let body = serde_json::to_vec(&body).unwrap_or_default();

    ResponseRecord::new(503)
      .with_header("content-type", "application/json")
      .with_header(OFFLINE_HEADER, "true")
      .with_body(body)
  }
}
