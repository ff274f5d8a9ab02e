use chrono::{DateTime, Utc};

/// Source of wall-clock time for timestamps on queue entries, cache records,
/// connectivity readings and placeholder bodies.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}
