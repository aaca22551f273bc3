//! Delivery: a message handed out by the queue together with its lease.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{QueueMessageId, ReceiptHandle};
use super::message::Attributes;

/// One dequeued message.
///
/// The body is whatever was enqueued, byte for byte. Only the delivery
/// metadata (`receipt`, `receive_count`) changes between redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub message_id: QueueMessageId,
    pub receipt: ReceiptHandle,
    pub body: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// 1 on first delivery, incremented on every redelivery.
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}
