//! Partition and generation naming.

use std::fmt;

/// The three partitions of a cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
  /// Precached at install time only
  Static,
  /// Everything outside the API namespace
  Dynamic,
  /// Responses under the API namespace
  Api,
}

impl PartitionKind {
  pub const ALL: [PartitionKind; 3] = [
    PartitionKind::Static,
    PartitionKind::Dynamic,
    PartitionKind::Api,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      PartitionKind::Static => "static",
      PartitionKind::Dynamic => "dynamic",
      PartitionKind::Api => "api",
    }
  }
}

impl fmt::Display for PartitionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A version tag scoping one coherent set of partitions.
///
/// Partition names embed the version (`<prefix>-<kind>-<version>`), so changing the
/// version is how every previously stored entry gets invalidated at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  prefix: String,
  version: String,
}

impl CacheGeneration {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn partition_name(&self, kind: PartitionKind) -> String {
    format!("{}-{}-{}", self.prefix, kind, self.version)
  }

  /// Names of this generation's partitions, in static/dynamic/api order.
  pub fn partition_names(&self) -> Vec<String> {
    PartitionKind::ALL
      .iter()
      .map(|kind| self.partition_name(*kind))
      .collect()
  }
}
