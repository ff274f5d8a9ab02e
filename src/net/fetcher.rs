//! Network attempts with a hard deadline.
//!
//! Mobile network stacks can stall without ever reporting failure, so every network
//! call the relay makes goes through [`TimeoutBoundedFetcher`]. The transport future
//! is raced against a timer; when the timer wins the transport future is dropped, so
//! a late response can never reach the cache or any other shared state.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{RelayError, Result};

use super::client::Transport;
use super::types::{RequestDescriptor, ResponseRecord};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct TimeoutBoundedFetcher {
  transport: Arc<dyn Transport>,
  timeout: Duration,
}

impl TimeoutBoundedFetcher {
  /// Fetcher with the [`DEFAULT_TIMEOUT`] deadline.
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Fetch with the configured deadline.
  pub async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseRecord> {
    self.fetch_within(request, self.timeout).await
  }

  /// Fetch with an explicit deadline.
  pub async fn fetch_within(
    &self,
    request: &RequestDescriptor,
    timeout: Duration,
  ) -> Result<ResponseRecord> {
    match tokio::time::timeout(timeout, self.transport.send(request)).await {
      Ok(result) => result,
      Err(_) => {
        debug!(url = %request.url(), ?timeout, "network attempt timed out");
        Err(RelayError::NetworkTimeout(timeout))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{url, ScriptedTransport};
  use tokio::time::Instant;

  #[tokio::test(start_paused = true)]
  async fn test_slow_network_times_out_at_deadline() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.delay("/slow", Duration::from_secs(30), ResponseRecord::new(200));
    let fetcher = TimeoutBoundedFetcher::new(transport.clone());

    let started = Instant::now();
    let result = fetcher
      .fetch(&RequestDescriptor::get(url("/slow")))
      .await;

    assert_eq!(result, Err(RelayError::NetworkTimeout(DEFAULT_TIMEOUT)));
    assert_eq!(started.elapsed(), DEFAULT_TIMEOUT);
  }

  #[tokio::test(start_paused = true)]
  async fn test_hanging_network_never_blocks_past_deadline() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.hang("/hang");
    let fetcher = TimeoutBoundedFetcher::new(transport).with_timeout(Duration::from_millis(250));

    let result = fetcher.fetch(&RequestDescriptor::get(url("/hang"))).await;
    assert_eq!(
      result,
      Err(RelayError::NetworkTimeout(Duration::from_millis(250)))
    );
  }

  #[tokio::test]
  async fn test_fast_network_wins_the_race() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("/ok", ResponseRecord::new(200).with_body("hello"));
    let fetcher = TimeoutBoundedFetcher::new(transport);

    let response = fetcher
      .fetch(&RequestDescriptor::get(url("/ok")))
      .await
      .unwrap();
    assert_eq!(response.body, b"hello");
  }

  #[tokio::test]
  async fn test_transport_failure_is_network_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_online(false);
    let fetcher = TimeoutBoundedFetcher::new(transport);

    let result = fetcher.fetch(&RequestDescriptor::get(url("/ok"))).await;
    assert!(matches!(result, Err(RelayError::Network(_))));
  }
}
