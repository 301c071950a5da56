//! Transactional outbox records.
//!
//! Outbound events are written in the same atomic commit as the order state
//! change that produced them, then published to the bus by a relay.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event the saga intends to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    /// Destination topic.
    pub topic: String,

    /// Partition key (the order id).
    pub key: String,

    /// Payload type name.
    pub event_type: String,

    /// Serialized payload.
    pub payload: serde_json::Value,
}

impl OutboundEvent {
    /// Serializes `payload` into an outbound event.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            event_type: event_type.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// A stored outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Record id. Reused as the bus message id, so a re-published record
    /// keeps its identity.
    pub id: Uuid,

    /// The order whose commit produced this record.
    pub order_id: OrderId,

    /// The event to publish.
    pub event: OutboundEvent,

    /// When the record was committed.
    pub created_at: DateTime<Utc>,

    /// When the record was published, if it was.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Creates an unpublished record for `order_id`.
    pub fn new(order_id: OrderId, event: OutboundEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            event,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    /// Returns true if the record has been published.
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}
