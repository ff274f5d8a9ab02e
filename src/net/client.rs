use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result as EyreResult};
use reqwest::Client;

use crate::error::Result;

use super::types::{RequestDescriptor, ResponseRecord};

/// The network seam. Any HTTP status is a response; only transport failures are errors.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseRecord>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
  client: Client,
}

impl HttpTransport {
  pub fn new() -> EyreResult<Self> {
    let client = Client::builder()
      .user_agent(concat!("offline-relay/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseRecord> {
    let mut builder = self
      .client
      .request(request.method().clone(), request.url().clone());

    for (name, value) in request.headers() {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
      builder = builder.body(body.to_vec());
    }

    let response = builder.send().await?;

    let mut record = ResponseRecord::new(response.status().as_u16());
    for (name, value) in response.headers() {
      // Non-UTF-8 header values can't be represented in the record
      if let Ok(value) = value.to_str() {
        record = record.with_header(name.as_str(), value);
      }
    }

    let body = response.bytes().await?;
    Ok(record.with_body(body.to_vec()))
  }
}
