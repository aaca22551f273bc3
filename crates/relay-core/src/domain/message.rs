//! Message: the immutable unit of work flowing through the pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;

/// Source tag stamped by the publisher.
pub const PUBLISHER_SOURCE: &str = "publisher";

/// Attribute key carrying the message type tag.
pub const MESSAGE_TYPE_ATTRIBUTE: &str = "messageType";

/// Small string map attached at publish time.
pub type Attributes = BTreeMap<String, String>;

/// A published event.
///
/// Fields are private on purpose: a `Message` is never mutated after creation,
/// and redelivery hands out the identical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    timestamp: DateTime<Utc>,
    source: String,
    data: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: Attributes,
}

impl Message {
    pub fn new(
        id: MessageId,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        data: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id,
            timestamp,
            source: source.into(),
            data: data.into(),
            attributes,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Raw payload as supplied by the producer.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// `data` interpreted as JSON when it parses, otherwise as a plain string.
    pub fn structured_data(&self) -> serde_json::Value {
        serde_json::from_str(&self.data)
            .unwrap_or_else(|_| serde_json::Value::String(self.data.clone()))
    }

    /// Wire form stored in the queue.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn sample(data: &str) -> Message {
        let mut attributes = Attributes::new();
        attributes.insert(MESSAGE_TYPE_ATTRIBUTE.to_string(), "event".to_string());
        Message::new(
            MessageId::from_ulid(Ulid::new()),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            PUBLISHER_SOURCE,
            data,
            attributes,
        )
    }

    #[test]
    fn body_roundtrip_preserves_every_field() {
        let msg = sample("hello");
        let back = Message::from_body(&msg.to_body().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn wire_shape_uses_plain_field_names() {
        let msg = sample("hello");
        let v: serde_json::Value = serde_json::from_str(&msg.to_body().unwrap()).unwrap();
        assert_eq!(v["source"], "publisher");
        assert_eq!(v["data"], "hello");
        assert_eq!(v["timestamp"], "2024-01-01T12:00:00Z");
        assert_eq!(v["attributes"]["messageType"], "event");
    }

    #[test]
    fn structured_data_parses_json_when_possible() {
        assert_eq!(
            sample(r#"{"order":42}"#).structured_data(),
            serde_json::json!({"order": 42})
        );
        assert_eq!(
            sample("not json").structured_data(),
            serde_json::json!("not json")
        );
    }

    #[test]
    fn decodes_producer_supplied_string_id() {
        let body = r#"{"id":"1700000000000","timestamp":"2024-01-01T00:00:00.000Z","data":"hello","source":"publisher"}"#;
        let msg = Message::from_body(body).unwrap();
        assert_eq!(msg.id().as_str(), "1700000000000");
        assert_eq!(msg.data(), "hello");
        assert!(msg.attributes().is_empty());
    }

    #[test]
    fn malformed_body_fails_to_decode() {
        assert!(Message::from_body("{\"id\": 1").is_err());
        assert!(Message::from_body("{}").is_err());
    }
}
