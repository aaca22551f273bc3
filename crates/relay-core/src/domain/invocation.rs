//! Invocation model: what the consumer sends to the backend and what it gets back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{QueueMessageId, RequestId};
use super::message::Message;

/// Source tag stamped by the consumer on every invocation.
pub const CONSUMER_SOURCE: &str = "consumer";

/// Payload of one backend invocation.
///
/// The original message plus the provenance the consumer adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub source: String,
    pub queue_message_id: QueueMessageId,
    pub received_at: DateTime<Utc>,
    pub original_message: Message,
    /// `original_message.data` decoded as JSON when possible.
    pub data: serde_json::Value,
}

impl InvocationRequest {
    pub fn new(
        queue_message_id: QueueMessageId,
        received_at: DateTime<Utc>,
        message: Message,
    ) -> Self {
        let data = message.structured_data();
        Self {
            source: CONSUMER_SOURCE.to_string(),
            queue_message_id,
            received_at,
            original_message: message,
            data,
        }
    }
}

/// Data-level outcome of a backend invocation.
///
/// Both variants are well-formed responses: the call itself completed. A
/// transport failure (unreachable, timeout) is never represented here; see
/// `InvokeError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BackendResponse {
    Success {
        message: String,
        request_id: RequestId,
        processing_time_ms: u64,
        processed_event: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Failure {
        message: String,
        error: String,
        request_id: RequestId,
    },
}

impl BackendResponse {
    pub fn request_id(&self) -> RequestId {
        match self {
            BackendResponse::Success { request_id, .. }
            | BackendResponse::Failure { request_id, .. } => *request_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BackendResponse::Success { .. })
    }

    /// HTTP-style status code of the response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            BackendResponse::Success { .. } => 200,
            BackendResponse::Failure { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn response_is_tagged_by_status() {
        let resp = BackendResponse::Failure {
            message: "Backend processing failed".to_string(),
            error: "boom".to_string(),
            request_id: RequestId::from_ulid(Ulid::new()),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "failure");
        assert_eq!(v["error"], "boom");
        assert!(v.get("requestId").is_some());
        assert_eq!(resp.status_code(), 500);
        assert!(!resp.is_success());
    }

    #[test]
    fn success_uses_camel_case_fields() {
        let resp = BackendResponse::Success {
            message: "ok".to_string(),
            request_id: RequestId::from_ulid(Ulid::new()),
            processing_time_ms: 750,
            processed_event: serde_json::json!({"a": 1}),
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["processingTimeMs"], 750);
        assert_eq!(v["processedEvent"]["a"], 1);

        let back: BackendResponse = serde_json::from_value(v).unwrap();
        assert_eq!(back, resp);
    }
}
