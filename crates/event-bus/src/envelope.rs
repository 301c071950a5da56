use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::{BusError, Result};

/// Unique identifier for a published message.
///
/// A message re-published after a crash keeps its id, so consumers can tell a
/// redelivery from a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message on the bus together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique identifier for this message.
    pub message_id: MessageId,

    /// The topic the message is published to.
    pub topic: String,

    /// Partition key. All messages with the same key land in the same
    /// partition and are consumed in publish order.
    pub key: String,

    /// The type of the payload (e.g., "PaymentRequest").
    pub event_type: String,

    /// When the message was created.
    pub timestamp: DateTime<Utc>,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// Free-form transport headers.
    pub headers: HashMap<String, String>,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::default()
    }

    /// Deserializes the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    message_id: Option<MessageId>,
    topic: Option<String>,
    key: Option<String>,
    event_type: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
}

impl EnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the partition key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a header entry.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builds the envelope, failing if a required field is missing.
    pub fn build(self) -> Result<Envelope> {
        Ok(Envelope {
            message_id: self.message_id.unwrap_or_default(),
            topic: self.topic.ok_or(BusError::MissingField("topic"))?,
            key: self.key.ok_or(BusError::MissingField("key"))?,
            event_type: self.event_type.ok_or(BusError::MissingField("event_type"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(BusError::MissingField("payload"))?,
            headers: self.headers,
        })
    }
}

/// A message handed to a consumer, with its position in the partition log.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered message.
    pub envelope: Envelope,

    /// Partition the message was read from.
    pub partition: usize,

    /// Offset of the message within its partition.
    pub offset: usize,
}
