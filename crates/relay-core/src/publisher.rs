//! Publisher - ingress
//!
//! 受け取った body を `Message` に正規化し、queue に 1 件だけ enqueue する。
//! retry はしない。失敗は `PublishError` として呼び出し側に返す。

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::domain::{
    Attributes, MESSAGE_TYPE_ATTRIBUTE, Message, PUBLISHER_SOURCE, PublishError, QueueMessageId,
};
use crate::ports::{Clock, IdGenerator, MessageQueue, SystemClock, UlidGenerator};

/// Data used when the inbound body is empty or absent.
pub const EMPTY_BODY_PLACEHOLDER: &str = "Hello from Publisher";

/// Value of the `messageType` attribute on every published message.
pub const EVENT_MESSAGE_TYPE: &str = "event";

/// Successful publish: the queue-assigned id and the message that was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub message_id: QueueMessageId,
    pub message: Message,
}

/// Structured response returned at the ingress boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngressResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl IngressResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

pub struct Publisher {
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Publisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Normalize an inbound body into a fresh `Message`.
    pub fn build_message(&self, body: Option<&str>) -> Message {
        let data = match body {
            Some(body) if !body.is_empty() => body,
            _ => EMPTY_BODY_PLACEHOLDER,
        };
        let mut attributes = Attributes::new();
        attributes.insert(MESSAGE_TYPE_ATTRIBUTE.to_string(), EVENT_MESSAGE_TYPE.to_string());

        Message::new(
            self.ids.message_id(),
            self.clock.now(),
            PUBLISHER_SOURCE,
            data,
            attributes,
        )
    }

    /// Build a message from `body` and enqueue it.
    #[tracing::instrument(skip_all)]
    pub async fn publish(&self, body: Option<&str>) -> Result<PublishReceipt, PublishError> {
        let message = self.build_message(body);
        let wire = message.to_body().map_err(PublishError::Encode)?;

        let message_id = self
            .queue
            .enqueue(wire, message.attributes().clone())
            .await
            .inspect_err(|err| {
                tracing::error!(
                    message_id = %message.id(),
                    error = %err,
                    "failed to publish message"
                );
            })?;

        tracing::info!(
            %message_id,
            event_id = %message.id(),
            data = message.data(),
            "message published"
        );
        Ok(PublishReceipt {
            message_id,
            message,
        })
    }

    /// Ingress entry point. Faults never escape; they become a 500 envelope.
    pub async fn handle(&self, body: Option<&str>) -> IngressResponse {
        match self.publish(body).await {
            Ok(receipt) => IngressResponse {
                status: 200,
                body: json!({
                    "message": "Event published successfully",
                    "messageId": receipt.message_id.to_string(),
                    "data": receipt.message,
                }),
            },
            Err(err) => IngressResponse {
                status: 500,
                body: json!({
                    "error": "Failed to publish message",
                    "details": err.to_string(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueError;
    use crate::ports::FixedClock;
    use crate::queue::{InMemoryQueue, QueueSettings};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::time::Duration;

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    fn setup(settings: QueueSettings) -> (Arc<InMemoryQueue>, Publisher) {
        let clock = Arc::new(clock());
        let queue = Arc::new(InMemoryQueue::new("events", settings).with_clock(clock.clone()));
        let publisher = Publisher::new(queue.clone()).with_clock(clock);
        (queue, publisher)
    }

    #[rstest]
    #[case(Some("hello"), "hello")]
    #[case(Some(""), EMPTY_BODY_PLACEHOLDER)]
    #[case(None, EMPTY_BODY_PLACEHOLDER)]
    fn build_message_normalizes_body(#[case] body: Option<&str>, #[case] expected: &str) {
        let (_, publisher) = setup(QueueSettings::default());
        let message = publisher.build_message(body);

        assert_eq!(message.data(), expected);
        assert_eq!(message.source(), "publisher");
        assert_eq!(message.timestamp(), clock().now());
        assert_eq!(
            message.attributes().get("messageType").map(String::as_str),
            Some("event")
        );
    }

    #[test]
    fn every_message_gets_a_fresh_id() {
        let (_, publisher) = setup(QueueSettings::default());
        let a = publisher.build_message(Some("x"));
        let b = publisher.build_message(Some("x"));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn publish_enqueues_exactly_one_message() {
        let (queue, publisher) = setup(QueueSettings::default());

        let receipt = publisher.publish(Some(r#"{"order":42}"#)).await.unwrap();
        assert_eq!(queue.counts().await.unwrap().visible, 1);

        let batch = queue.dequeue(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, receipt.message_id);
        assert_eq!(Message::from_body(&batch[0].body).unwrap(), receipt.message);
        assert_eq!(batch[0].attributes.get("messageType").map(String::as_str), Some("event"));
    }

    #[tokio::test]
    async fn oversized_body_is_a_publish_error() {
        let (queue, publisher) = setup(QueueSettings::default().with_max_payload_bytes(64));

        let err = publisher.publish(Some(&"x".repeat(200))).await.unwrap_err();
        assert!(matches!(
            err,
            PublishError::Enqueue(QueueError::PayloadTooLarge { limit: 64, .. })
        ));
        assert_eq!(queue.counts().await.unwrap().stored(), 0);
    }

    #[tokio::test]
    async fn handle_wraps_success_in_ingress_envelope() {
        let (_, publisher) = setup(QueueSettings::default());

        let resp = publisher.handle(None).await;
        assert!(resp.is_success());
        assert_eq!(resp.body["message"], "Event published successfully");
        assert!(resp.body["messageId"].as_str().unwrap().starts_with("qm-"));
        assert_eq!(resp.body["data"]["data"], EMPTY_BODY_PLACEHOLDER);
        assert_eq!(resp.body["data"]["source"], "publisher");
    }

    #[tokio::test]
    async fn permission_failure_is_distinguishable() {
        let (queue, publisher) = setup(QueueSettings::default());
        queue.deny_send().await;

        let err = publisher.publish(Some("hello")).await.unwrap_err();
        assert!(matches!(err, PublishError::Enqueue(QueueError::PermissionDenied(_))));

        let resp = publisher.handle(Some("hello")).await;
        assert_eq!(resp.status, 500);
        assert!(resp.body["details"].as_str().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn handle_converts_enqueue_failure_into_500() {
        let (queue, publisher) = setup(QueueSettings::default());
        queue.close().await;

        let resp = publisher.handle(Some("hello")).await;
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"], "Failed to publish message");
        assert!(resp.body["details"].as_str().unwrap().contains("unavailable"));
    }
}
