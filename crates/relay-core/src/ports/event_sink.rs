//! ExpirySink port - retention 切れで失われた message の通知先
//!
//! Retention expiry is the pipeline's only permanent-loss path, so every
//! purge is handed to a sink instead of disappearing silently.
//!
//! # 実装
//! - **LogExpirySink**: `warn` ログを出すだけ（デフォルト）
//! - **CollectingExpirySink**: 受け取った message を保持（テスト・dead-letter 用）

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Attributes, QueueMessageId};

/// A message purged after its retention period elapsed without acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredMessage {
    pub message_id: QueueMessageId,
    pub body: String,
    pub attributes: Attributes,
    pub enqueued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    /// How many times it was delivered before being purged.
    pub receive_count: u32,
}

/// Receives retention purges. Called outside the queue lock.
pub trait ExpirySink: Send + Sync {
    fn message_expired(&self, expired: &ExpiredMessage);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogExpirySink;

impl ExpirySink for LogExpirySink {
    fn message_expired(&self, expired: &ExpiredMessage) {
        tracing::warn!(
            message_id = %expired.message_id,
            enqueued_at = %expired.enqueued_at,
            receive_count = expired.receive_count,
            "message purged after retention period without acknowledgment"
        );
    }
}

/// Keeps every purged message in memory.
#[derive(Debug, Default)]
pub struct CollectingExpirySink {
    expired: Mutex<Vec<ExpiredMessage>>,
}

impl CollectingExpirySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expired(&self) -> Vec<ExpiredMessage> {
        self.expired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ExpirySink for CollectingExpirySink {
    fn message_expired(&self, expired: &ExpiredMessage) {
        self.expired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(expired.clone());
    }
}
