//! Inbound and outbound event records.
//!
//! Payloads travel as opaque bytes. By convention every topic in the pipeline
//! carries JSON, so both records provide JSON helpers, but nothing in the bus
//! layer inspects the bytes.
//!
//! # Example
//!
//! ```
//! use event_relay_core::event::{EventEnvelope, OutboundEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct OrderSuccessful { user_id: String, order_id: String }
//!
//! let envelope = EventEnvelope::new(
//!     "order-successful",
//!     None,
//!     br#"{"userId":"u1","orderId":"o1","extra":true}"#.to_vec(),
//! );
//! let order: OrderSuccessful = envelope.decode().unwrap();
//! assert_eq!(order.user_id, "u1");
//!
//! let outbound = OutboundEvent::json("email-successful", None, &order).unwrap();
//! assert_eq!(outbound.topic, "email-successful");
//! ```

use crate::error::TypedError;
use serde::{Serialize, de::DeserializeOwned};

/// A message received from the broker.
///
/// Immutable once received; the relay hands out shared references only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic (`-1` when the bus has no partitions)
    pub partition: i32,
    /// Offset within the partition (`-1` when the bus has no offsets)
    pub offset: i64,
    /// Optional message key
    pub key: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl EventEnvelope {
    /// Create an envelope without broker position metadata.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition: -1,
            offset: -1,
            key,
            payload,
        }
    }

    /// Attach broker position metadata.
    #[must_use]
    pub const fn at(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Decode the JSON payload into a domain record.
    ///
    /// Unknown fields are tolerated (serde's default).
    ///
    /// # Errors
    ///
    /// Returns a `Validation` [`TypedError`] carrying topic and key when the
    /// payload is not valid JSON of the expected shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TypedError> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            TypedError::validation(format!("Malformed payload on topic '{}': {e}", self.topic))
                .with_topic(self.topic.clone())
                .with_optional_key(self.key.as_deref())
                .with_context("partition", self.partition)
                .with_context("offset", self.offset)
        })
    }

    /// Payload as UTF-8 text, lossily.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Destination topic
    pub topic: String,
    /// Optional message key (partitioning)
    pub key: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Message headers
    pub headers: Vec<(String, String)>,
}

impl OutboundEvent {
    /// Create an outbound event from raw bytes.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            headers: Vec::new(),
        }
    }

    /// Serialize a record as the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an `Internal` [`TypedError`] if the record cannot be serialized.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: Option<String>,
        record: &T,
    ) -> Result<Self, TypedError> {
        let topic = topic.into();
        let payload = serde_json::to_vec(record).map_err(|e| {
            TypedError::internal(format!("Failed to serialize event: {e}")).with_topic(topic.clone())
        })?;
        Ok(Self::new(topic, key, payload))
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Record {
        user_id: String,
        order_id: Option<String>,
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let envelope = EventEnvelope::new(
            "order-successful",
            None,
            br#"{"userId":"u1","orderId":"o1","unexpected":[1,2]}"#.to_vec(),
        );
        let record: Record = envelope.decode().unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.order_id.as_deref(), Some("o1"));
    }

    #[test]
    fn decode_failure_is_validation_with_context() {
        let envelope = EventEnvelope::new("order-successful", Some("k1".into()), b"not json".to_vec())
            .at(2, 17);
        let err = envelope.decode::<Record>().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context()["topic"], "order-successful");
        assert_eq!(err.context()["key"], "k1");
        assert_eq!(err.context()["partition"], 2);
        assert_eq!(err.context()["offset"], 17);
    }

    #[test]
    fn decode_missing_required_field_fails() {
        let envelope = EventEnvelope::new("order-successful", None, br#"{"orderId":"o1"}"#.to_vec());
        assert!(envelope.decode::<Record>().is_err());
    }

    #[test]
    fn outbound_headers_lookup() {
        let event = OutboundEvent::new("dlq", None, vec![1])
            .with_header("x-error-kind", "ValidationError");
        assert_eq!(event.header("x-error-kind"), Some("ValidationError"));
        assert_eq!(event.header("missing"), None);
    }
}
