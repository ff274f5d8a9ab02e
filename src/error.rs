//! Error taxonomy for the relay.
//!
//! Only network errors ever reach the request path; cache write and replay errors
//! are logged where they happen and never fail a response.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
  #[error("network timeout after {0:?}")]
  NetworkTimeout(Duration),

  #[error("network error: {0}")]
  Network(String),

  #[error("cache write to {partition} rejected for {url}: {reason}")]
  CacheWrite {
    partition: String,
    url: String,
    reason: String,
  },

  #[error("replay of {url} failed: {reason}")]
  QueueReplay { url: String, reason: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl From<reqwest::Error> for RelayError {
  fn from(err: reqwest::Error) -> Self {
    RelayError::Network(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, RelayError>;
