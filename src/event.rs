//! Host channel: JSON-lines events in, JSON-lines outputs out.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::control::{ControlMessage, ControlReply};
use crate::error::{RelayError, Result};
use crate::net::{RequestDescriptor, RequestMode, ResponseSource, Served};
use crate::notify::Notification;

/// An intercepted request as the host describes it. Bodies are base64.
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
  pub url: String,
  #[serde(default = "default_method")]
  pub method: String,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
  #[serde(default)]
  pub mode: RequestMode,
}

fn default_method() -> String {
  "GET".to_string()
}

impl WireRequest {
  /// Relative URLs resolve against `origin`.
  pub fn into_descriptor(self, origin: &Url) -> Result<RequestDescriptor> {
    let url = origin
      .join(&self.url)
      .map_err(|e| RelayError::InvalidRequest(format!("bad url {}: {}", self.url, e)))?;
    let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
      .map_err(|_| RelayError::InvalidRequest(format!("bad method {}", self.method)))?;

    let mut request = RequestDescriptor::new(method, url).with_mode(self.mode);
    for (name, value) in self.headers {
      request = request.with_header(&name, value);
    }
    if let Some(body) = self.body {
      let bytes = STANDARD
        .decode(body)
        .map_err(|e| RelayError::InvalidRequest(format!("body is not base64: {}", e)))?;
      request = request.with_body(bytes);
    }
    Ok(request)
  }
}

/// Events read from the host, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostEvent {
  Fetch { id: String, request: WireRequest },
  Control { id: String, message: ControlMessage },
  /// Platform connectivity push signal
  Connectivity { online: bool },
  /// Background sync trigger
  Sync { tag: String },
}

/// Lines written back to the host, tagged by `kind`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostOutput {
  Response {
    id: String,
    source: ResponseSource,
    status: u16,
    headers: BTreeMap<String, String>,
    /// base64
    body: String,
  },
  Reply {
    id: String,
    #[serde(flatten)]
    reply: ControlReply,
  },
  Notification {
    #[serde(flatten)]
    notification: Notification,
  },
  Error {
    id: String,
    message: String,
  },
}

impl HostOutput {
  /// Response line for request `id`, body re-encoded as base64.
  pub fn response(id: String, served: Served) -> Self {
    HostOutput::Response {
      id,
      source: served.source,
      status: served.response.status,
      body: STANDARD.encode(&served.response.body),
      headers: served.response.headers,
    }
  }
}

/// Event handler that produces host events from a line-oriented reader
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<HostEvent>,
}

impl EventHandler {
  pub fn stdin() -> Self {
    Self::new(tokio::io::stdin())
  }

  /// Spawn a reader task. Malformed lines are logged and skipped; EOF ends the stream.
  pub fn new<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read host input");
            break;
          }
        };

        let line = line.trim();
        if line.is_empty() {
          continue;
        }

        match serde_json::from_str::<HostEvent>(line) {
          Ok(event) => {
            if tx.send(event).is_err() {
              break;
            }
          }
          Err(e) => warn!(error = %e, "skipping malformed host event"),
        }
      }
      debug!("host input closed");
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<HostEvent> {
    self.rx.recv().await
  }
}
