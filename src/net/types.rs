//! Request and response model shared by every component.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the host issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
  /// Top-level document navigation
  Navigate,
  SameOrigin,
  NoCors,
  #[default]
  Cors,
}

/// A captured outbound request.
///
/// The body is snapshotted at capture time, so the descriptor can be replayed any
/// number of times after the original transport body has been consumed. Header names
/// are lowercased, which makes the header set order- and case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
  url: Url,
  method: Method,
  headers: BTreeMap<String, String>,
  body: Option<Vec<u8>>,
  mode: RequestMode,
}

impl RequestDescriptor {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      url,
      method,
      headers: BTreeMap::new(),
      body: None,
      mode: RequestMode::default(),
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn headers(&self) -> &BTreeMap<String, String> {
    &self.headers
  }

  pub fn body(&self) -> Option<&[u8]> {
    self.body.as_deref()
  }

  pub fn mode(&self) -> RequestMode {
    self.mode
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Anything that is not a pure read (GET, HEAD, OPTIONS, TRACE).
  pub fn is_mutating(&self) -> bool {
    !self.method.is_safe()
  }
}

/// A captured response: status, headers and a body snapshot.
///
/// Records are never patched. A refresh replaces the stored record wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  /// When the record was written to the cache (None for live network responses)
  pub stored_at: Option<DateTime<Utc>>,
}

impl ResponseRecord {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: Vec::new(),
      stored_at: None,
    }
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Status in the 2xx range.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
  /// Live response from the origin
  Network,
  /// Stored record from any cache partition
  Cache,
  /// Cached document shell served for a navigation
  Shell,
  /// Synthesized offline response
  Placeholder,
  /// Request was outside the relay's control and went straight to the network
  Passthrough,
}

/// A response handed back to the host, tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: ResponseRecord,
  pub source: ResponseSource,
}

impl Served {
  pub fn new(response: ResponseRecord, source: ResponseSource) -> Self {
    Self { response, source }
  }

  pub fn network(response: ResponseRecord) -> Self {
    Self::new(response, ResponseSource::Network)
  }

  pub fn cache(response: ResponseRecord) -> Self {
    Self::new(response, ResponseSource::Cache)
  }
}
