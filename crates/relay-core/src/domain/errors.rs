//! Error types, one enum per seam.
//!
//! - `QueueError`: queue port failures (enqueue / dequeue / acknowledge)
//! - `InvokeError`: transport-level backend invocation failures
//! - `ProcessError`: per-message consumer failures (these abort the batch)
//! - `PublishError`: ingress failures reported to the publisher's caller

use std::time::Duration;

use thiserror::Error;

use super::ids::{QueueMessageId, RequestId};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid batch size {requested} (must be 1..={max})")]
    InvalidBatchSize { requested: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend '{target}' is unreachable")]
    Unreachable { target: String },

    #[error("backend '{target}' timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("invocation payload could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("message {message_id} could not be decoded: {source}")]
    Decode {
        message_id: QueueMessageId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("backend reported failure (request {request_id}): {message}: {error}")]
    LogicalFailure {
        request_id: RequestId,
        message: String,
        error: String,
    },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("message could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("enqueue failed: {0}")]
    Enqueue(#[from] QueueError),
}
