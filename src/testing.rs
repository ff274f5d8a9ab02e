//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::clock::Clock;
use crate::connectivity::ConnectivityProbe;
use crate::error::{RelayError, Result};
use crate::net::{RequestDescriptor, ResponseRecord, Transport};

pub const ORIGIN: &str = "http://localhost:8080";

/// Resolve a path against the test origin.
pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Route {
  Respond(ResponseRecord),
  Delay(Duration, ResponseRecord),
  Hang,
  Fail,
}

/// Transport that answers from a per-path script and records every call.
///
/// While "offline" every call fails with a network error. Unscripted paths answer 404.
pub struct ScriptedTransport {
  online: AtomicBool,
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, path: &str, response: ResponseRecord) {
    self.route(path, Route::Respond(response));
  }

  pub fn delay(&self, path: &str, delay: Duration, response: ResponseRecord) {
    self.route(path, Route::Delay(delay, response));
  }

  pub fn hang(&self, path: &str) {
    self.route(path, Route::Hang);
  }

  pub fn fail(&self, path: &str) {
    self.route(path, Route::Fail);
  }

  fn route(&self, path: &str, route: Route) {
    self.routes.lock().unwrap().insert(path.to_string(), route);
  }

  pub fn calls(&self) -> Vec<(Method, String)> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(_, p)| p == path)
      .count()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseRecord> {
    let path = request.path().to_string();
    self
      .calls
      .lock()
      .unwrap()
      .push((request.method().clone(), path.clone()));

    if !self.online.load(Ordering::SeqCst) {
      return Err(RelayError::Network("connection refused".to_string()));
    }

    let route = self.routes.lock().unwrap().get(&path).cloned();
    match route {
      Some(Route::Respond(response)) => Ok(response),
      Some(Route::Delay(delay, response)) => {
        tokio::time::sleep(delay).await;
        Ok(response)
      }
      Some(Route::Hang) => std::future::pending().await,
      Some(Route::Fail) => Err(RelayError::Network("connection reset".to_string())),
      None => Ok(ResponseRecord::new(404)),
    }
  }
}

/// Clock pinned to a settable instant.
pub struct FixedClock {
  now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
  pub fn at_millis(ms: i64) -> Self {
    Self {
      now: Mutex::new(Utc.timestamp_millis_opt(ms).unwrap()),
    }
  }

  pub fn set_millis(&self, ms: i64) {
    *self.now.lock().unwrap() = Utc.timestamp_millis_opt(ms).unwrap();
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap()
  }
}

/// Probe that reports whatever it was last told.
pub struct StaticProbe {
  online: AtomicBool,
}

impl StaticProbe {
  pub fn new(online: bool) -> Self {
    Self {
      online: AtomicBool::new(online),
    }
  }

  pub fn set(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
  async fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}

/// Loopback HTTP server that answers a single connection with a canned response.
/// The handle yields the raw request text it received.
pub async fn serve_once(response: &'static str) -> (Url, JoinHandle<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  let handle = tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    while !request_complete(&raw) {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      raw.extend_from_slice(&buf[..n]);
    }
    socket.write_all(response.as_bytes()).await.unwrap();
    let _ = socket.shutdown().await;
    String::from_utf8_lossy(&raw).into_owned()
  });

  (Url::parse(&format!("http://{}/", addr)).unwrap(), handle)
}

/// An address nothing listens on.
pub async fn refused_url() -> Url {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  drop(listener);
  Url::parse(&format!("http://{}/", addr)).unwrap()
}

fn request_complete(raw: &[u8]) -> bool {
  let text = String::from_utf8_lossy(raw);
  let Some(end) = text.find("\r\n\r\n") else {
    return false;
  };
  let length = text[..end]
    .lines()
    .filter_map(|line| line.split_once(':'))
    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);
  raw.len() >= end + 4 + length
}
