//! Cache storage trait with in-memory and SQLite implementations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::net::ResponseRecord;

use super::key::CacheKey;

/// Trait for cache storage backends.
///
/// Every mutation replaces or deletes a whole record; nothing spans two partitions.
pub trait CacheStorage: Send + Sync {
  /// Partition names in creation order.
  fn partitions(&self) -> Result<Vec<String>>;

  /// Create the partition if it doesn't exist yet.
  fn open_partition(&self, partition: &str) -> Result<()>;

  /// Delete a partition and everything in it. Returns whether it existed.
  fn delete_partition(&self, partition: &str) -> Result<bool>;

  /// Look up a record. An exact URL match wins; with `ignore_query` the oldest entry
  /// whose query-less URL matches is returned otherwise.
  fn get(&self, partition: &str, key: &CacheKey, ignore_query: bool)
    -> Result<Option<ResponseRecord>>;

  /// Store or overwrite a record, creating the partition if needed.
  fn put(&self, partition: &str, key: &CacheKey, record: &ResponseRecord) -> Result<()>;

  /// Delete one record. Returns whether it existed.
  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool>;

  /// URLs stored in a partition, oldest first.
  fn keys(&self, partition: &str) -> Result<Vec<String>>;
}

struct MemoryPartition {
  name: String,
  entries: Vec<(CacheKey, ResponseRecord)>,
}

/// Process-lifetime storage.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<Vec<MemoryPartition>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_partitions<R>(&self, f: impl FnOnce(&mut Vec<MemoryPartition>) -> R) -> Result<R> {
    let mut partitions = self
      .partitions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut *partitions))
  }
}

impl CacheStorage for MemoryStorage {
  fn partitions(&self) -> Result<Vec<String>> {
    self.with_partitions(|partitions| partitions.iter().map(|p| p.name.clone()).collect())
  }

  fn open_partition(&self, partition: &str) -> Result<()> {
    self.with_partitions(|partitions| {
      if !partitions.iter().any(|p| p.name == partition) {
        partitions.push(MemoryPartition {
          name: partition.to_string(),
          entries: Vec::new(),
        });
      }
    })
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    self.with_partitions(|partitions| {
      let before = partitions.len();
      partitions.retain(|p| p.name != partition);
      partitions.len() != before
    })
  }

  fn get(
    &self,
    partition: &str,
    key: &CacheKey,
    ignore_query: bool,
  ) -> Result<Option<ResponseRecord>> {
    self.with_partitions(|partitions| {
      let entries = &partitions.iter().find(|p| p.name == partition)?.entries;

      entries
        .iter()
        .find(|(k, _)| k.url == key.url)
        .or_else(|| {
          if ignore_query {
            entries.iter().find(|(k, _)| k.base == key.base)
          } else {
            None
          }
        })
        .map(|(_, record)| record.clone())
    })
  }

  fn put(&self, partition: &str, key: &CacheKey, record: &ResponseRecord) -> Result<()> {
    self.open_partition(partition)?;
    self.with_partitions(|partitions| {
      if let Some(p) = partitions.iter_mut().find(|p| p.name == partition) {
        // Replace wholesale; the new record moves to the end like a fresh insert
        p.entries.retain(|(k, _)| k.url != key.url);
        p.entries.push((key.clone(), record.clone()));
      }
    })
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    self.with_partitions(|partitions| {
      match partitions.iter_mut().find(|p| p.name == partition) {
        Some(p) => {
          let before = p.entries.len();
          p.entries.retain(|(k, _)| k.url != key.url);
          p.entries.len() != before
        }
        None => false,
      }
    })
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    self.with_partitions(|partitions| {
      partitions
        .iter()
        .find(|p| p.name == partition)
        .map(|p| p.entries.iter().map(|(k, _)| k.url.clone()).collect())
        .unwrap_or_default()
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Private in-memory database, gone when dropped.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-relay").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Partitions; rowid order is creation order
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY
);

-- Stored responses
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    base_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT,
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES cache_partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_base ON cache_entries(partition, base_url);
"#;

type EntryRow = (u16, String, Vec<u8>, Option<String>);

impl CacheStorage for SqliteStorage {
  fn partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query partitions: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn open_partition(&self, partition: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;
    Ok(())
  }

  fn delete_partition(&self, partition: &str) -> Result<bool> {
    let conn = self.lock()?;

    // Rolls back on drop, so an early return leaves no transaction open
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", partition, e))?;

    let deleted = tx
      .execute(
        "DELETE FROM cache_partitions WHERE name = ?",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get(
    &self,
    partition: &str,
    key: &CacheKey,
    ignore_query: bool,
  ) -> Result<Option<ResponseRecord>> {
    let conn = self.lock()?;

    let exact: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(&key.url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let row = match exact {
      Some(row) => Some(row),
      None if ignore_query => conn
        .query_row(
          "SELECT status, headers, body, stored_at FROM cache_entries
           WHERE partition = ? AND base_url = ?
           ORDER BY rowid LIMIT 1",
          params![partition, key.base],
          |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()
        .map_err(|e| eyre!("Failed to query cache entry: {}", e))?,
      None => None,
    };

    row.map(decode_record).transpose()
  }

  fn put(&self, partition: &str, key: &CacheKey, record: &ResponseRecord) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&record.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
    let stored_at = record.stored_at.map(|t| t.to_rfc3339());

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (partition, key_hash, url, base_url, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          partition,
          key_hash(&key.url),
          key.url,
          key.base,
          record.status,
          headers,
          record.body,
          stored_at
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete(&self, partition: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition = ? AND key_hash = ?",
        params![partition, key_hash(&key.url)],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(deleted > 0)
  }

  fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE partition = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query cache keys: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(urls)
  }
}

/// SHA256 hash for stable, fixed-length keys
fn key_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn decode_record((status, headers, body, stored_at): EntryRow) -> Result<ResponseRecord> {
  let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
  let stored_at = stored_at.as_deref().map(parse_datetime).transpose()?;

  Ok(ResponseRecord {
    status,
    headers,
    body,
    stored_at,
  })
}

/// Parse an RFC 3339 timestamp written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
