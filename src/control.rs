//! Control messages sent by the host to the relay, and their replies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Force a waiting instance to activate now
  SkipWaiting,
  CheckOnlineStatus,
  /// Drain the offline queue, if online
  ProcessQueue,
  GetQueueSize,
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
  OnlineStatus {
    online: bool,
  },
  QueueSize {
    #[serde(rename = "queueSize")]
    queue_size: usize,
  },
}
