//! MessageQueue port - at-least-once buffer with visibility timeout.
//!
//! # 設計原則
//! - body は opaque（queue は中身を解釈しない）
//! - dequeue した message は visibility timeout の間だけ他の consumer から見えない
//! - acknowledge されなければ timeout 後に再配送される（唯一の retry 手段）

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Attributes, Delivery, QueueError, QueueMessageId, ReceiptHandle};
use crate::observability::QueueCounts;

/// Maximum number of messages a single dequeue may return.
pub const MAX_BATCH_SIZE: usize = 10;

/// Result of acknowledging a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The message was permanently deleted.
    Deleted,
    /// The receipt no longer refers to a live lease (already deleted, purged,
    /// or superseded by a redelivery). Nothing changed.
    Stale,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Durably store a body and return the queue-assigned id.
    async fn enqueue(&self, body: String, attributes: Attributes)
    -> Result<QueueMessageId, QueueError>;

    /// Lease up to `max_messages` visible messages.
    ///
    /// Returns immediately when something is visible; otherwise waits up to
    /// `wait` for messages to arrive. `Duration::ZERO` never waits.
    async fn dequeue(&self, max_messages: usize, wait: Duration)
    -> Result<Vec<Delivery>, QueueError>;

    /// Delete the message leased under `receipt`. Idempotent.
    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<Acknowledgement, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;
}
