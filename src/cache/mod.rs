//! Versioned, partitioned response cache.
//!
//! - Three partitions per generation: static (precached), dynamic, api
//! - Lookups search every partition and ignore query strings
//! - Advancing the generation makes older partitions eligible for eviction
//! - Backed by process memory or SQLite

mod generation;
mod key;
mod layer;
mod storage;

pub use generation::{CacheGeneration, PartitionKind};
pub use key::CacheKey;
pub use layer::{CacheHit, CacheStore, WarmReport};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
