//! Observability - read-only status views over the queue.
//!
//! `QueueCounts` is what `MessageQueue::counts` returns and what the CLI prints.

use serde::{Deserialize, Serialize};

/// Snapshot of the queue for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Stored and eligible for delivery.
    pub visible: usize,
    /// Leased and hidden until their visibility timeout.
    pub in_flight: usize,
    /// Deleted through `acknowledge` since startup.
    pub acknowledged: u64,
    /// Purged by retention since startup.
    pub expired: u64,
}

impl QueueCounts {
    /// Messages currently held by the queue.
    pub fn stored(&self) -> usize {
        self.visible + self.in_flight
    }
}
