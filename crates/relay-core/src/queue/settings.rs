//! Queue settings: visibility timeout, retention and payload limit.

use std::time::Duration;

/// Per-queue delivery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a dequeued message stays hidden before it can be redelivered.
    pub visibility_timeout: Duration,

    /// How long an unacknowledged message is kept before it is purged.
    pub retention: Duration,

    /// Largest accepted body, in bytes.
    pub max_payload_bytes: usize,
}

impl QueueSettings {
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }
}

impl Default for QueueSettings {
    /// 300 s visibility, 14 days retention, 256 KiB bodies.
    fn default() -> Self {
        Self {
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
            retention: Self::DEFAULT_RETENTION,
            max_payload_bytes: Self::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}
