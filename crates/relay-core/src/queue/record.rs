//! Message record: stored body + delivery metadata.

use chrono::{DateTime, Utc};

use super::MessageState;
use crate::domain::{Attributes, Delivery, QueueMessageId, ReceiptHandle};

/// Single source of truth for one stored message.
///
/// The body and attributes never change; only the delivery metadata moves.
/// Queue structures (ready / lease heap / receipt index) hold ids only.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: QueueMessageId,
    pub body: String,
    pub attributes: Attributes,
    pub enqueued_at: DateTime<Utc>,
    pub state: MessageState,
    /// Receipt of the current lease; its expiry lives in the queue's lease heap.
    pub lease: Option<ReceiptHandle>,
    /// Number of deliveries so far (including the current one if InFlight).
    pub receive_count: u32,
}

impl MessageRecord {
    pub fn new(
        message_id: QueueMessageId,
        body: String,
        attributes: Attributes,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            body,
            attributes,
            enqueued_at,
            state: MessageState::Visible,
            lease: None,
            receive_count: 0,
        }
    }

    /// Visible -> InFlight. Returns the delivery handed to the consumer.
    pub fn start_lease(&mut self, receipt: ReceiptHandle) -> Delivery {
        self.state = MessageState::InFlight;
        self.lease = Some(receipt);
        self.receive_count += 1;
        Delivery {
            message_id: self.message_id,
            receipt,
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            receive_count: self.receive_count,
            enqueued_at: self.enqueued_at,
        }
    }

    /// InFlight -> Visible, if `receipt` is still the current lease.
    pub fn release_lease(&mut self, receipt: &ReceiptHandle) -> bool {
        if !self.holds(receipt) {
            return false;
        }
        self.state = MessageState::Visible;
        self.lease = None;
        true
    }

    /// Is `receipt` the lease currently held on this message?
    pub fn holds(&self, receipt: &ReceiptHandle) -> bool {
        self.state == MessageState::InFlight && self.lease.as_ref() == Some(receipt)
    }

    pub fn is_expired(&self, retention_deadline: DateTime<Utc>) -> bool {
        self.enqueued_at <= retention_deadline
    }
}
