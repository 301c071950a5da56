use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::envelope::{Delivery, Envelope};
use crate::error::Result;

/// Core trait for the partitioned message transport.
///
/// Each consumer group keeps one committed offset per `(topic, partition)`.
/// `poll` returns the message at that offset without advancing it, and
/// `commit` advances it past a delivery. A message that is polled but never
/// committed is handed out again on the next poll, which gives at-least-once
/// delivery.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends a message to the partition selected by its key.
    async fn publish(&self, envelope: Envelope) -> Result<Delivery>;

    /// Returns the next uncommitted message of a partition for a group, if any.
    async fn poll(&self, group: &str, topic: &str, partition: usize) -> Result<Option<Delivery>>;

    /// Marks a delivery as processed for a group.
    ///
    /// Committing a delivery that is already behind the committed offset is a
    /// no-op. Committing past the next expected offset is an error.
    async fn commit(&self, group: &str, delivery: &Delivery) -> Result<()>;

    /// Number of partitions per topic.
    fn partitions(&self) -> usize;

    /// Returns a receiver that changes whenever a message is published.
    fn subscribe_changes(&self) -> watch::Receiver<u64>;
}

/// Convenience methods layered over [`EventBus`].
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes a payload and publishes it under the given topic and key.
    async fn publish_event<T>(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: &T,
    ) -> Result<Delivery>
    where
        T: Serialize + Sync,
    {
        let envelope = Envelope::builder()
            .topic(topic)
            .key(key)
            .event_type(event_type)
            .payload(payload)?
            .build()?;
        self.publish(envelope).await
    }
}

impl<B: EventBus + ?Sized> EventBusExt for B {}

/// Maps a partition key onto one of `partitions` partitions.
///
/// The mapping is stable for the lifetime of the process, so every message
/// keyed by the same order id lands in the same partition.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let partitions = partitions.max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}
