use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::proxy::DEFAULT_MESSAGE;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the relay fronts; relative request URLs resolve against it
  pub origin: String,
  /// Path prefix of the API namespace
  pub api_prefix: String,
  /// Message carried by synthesized offline responses
  pub offline_message: String,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub connectivity: ConnectivityConfig,
  pub queue: QueueConfig,
  pub lifecycle: LifecycleConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      api_prefix: "/api/".to_string(),
      offline_message: DEFAULT_MESSAGE.to_string(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      connectivity: ConnectivityConfig::default(),
      queue: QueueConfig::default(),
      lifecycle: LifecycleConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Lost on exit
  #[default]
  Memory,
  /// SQLite file, survives restarts
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  /// Bump to replace every partition on the next activation
  pub version: String,
  pub storage: StorageKind,
  /// SQLite database path (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  /// Paths warmed into the static partition during install
  pub precache: Vec<String>,
  /// Document shell served to offline navigations
  pub shell: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "offline-relay".to_string(),
      version: "v1".to_string(),
      storage: StorageKind::Memory,
      path: None,
      precache: ["/", "/index.html", "/favicon.png", "/manifest.json"]
        .into_iter()
        .map(String::from)
        .collect(),
      shell: "/index.html".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_ms: u64,
  /// Polled with HEAD requests; defaults to the origin
  pub probe_url: Option<String>,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_ms: 5000,
      probe_url: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub poll_interval_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 3000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub max_len: usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      max_len: crate::queue::DEFAULT_MAX_LEN,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Activate as soon as install finishes
  pub skip_waiting: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self { skip_waiting: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-relay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-relay/config.yaml
  /// 4. Built-in defaults
  ///
  /// OFFLINE_RELAY_ORIGIN overrides the origin from any source.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("OFFLINE_RELAY_ORIGIN") {
      config.origin = origin;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-relay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-relay").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    if self.network.timeout_ms == 0 {
      return Err(eyre!("network.timeout_ms must be greater than zero"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL {}: {}", path, e))
  }

  pub fn precache_urls(&self) -> Result<Vec<Url>> {
    self.cache.precache.iter().map(|p| self.resolve(p)).collect()
  }

  pub fn probe_url(&self) -> Result<Url> {
    match &self.network.probe_url {
      Some(probe) => self.resolve(probe),
      None => self.origin_url(),
    }
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_millis(self.network.timeout_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.connectivity.poll_interval_ms)
  }
}
