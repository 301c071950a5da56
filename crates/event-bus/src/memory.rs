use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};

use crate::{
    BusError, Delivery, Envelope, Result,
    bus::{EventBus, partition_for},
};

/// Default number of partitions per topic.
pub const DEFAULT_PARTITIONS: usize = 8;

#[derive(Default)]
struct BusState {
    /// Partition logs keyed by topic.
    topics: HashMap<String, Vec<Vec<Envelope>>>,
    /// Next offset to deliver, keyed by (group, topic, partition).
    committed: HashMap<(String, String, usize), usize>,
    /// Every message in global publish order.
    history: Vec<Envelope>,
}

/// In-memory event bus.
///
/// Keeps every partition log in memory for the lifetime of the process.
/// Provides the same ordering and delivery guarantees as a broker-backed bus
/// within a single process, and is what tests and the simulated runtime use.
#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<RwLock<BusState>>,
    partitions: usize,
    changes: Arc<watch::Sender<u64>>,
}

impl InMemoryEventBus {
    /// Creates a bus with the default partition count.
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates a bus with the given number of partitions per topic.
    pub fn with_partitions(partitions: usize) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            partitions: partitions.max(1),
            changes: Arc::new(tx),
        }
    }

    /// Returns every message published to a topic, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<Envelope> {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the total number of messages published to all topics.
    pub async fn message_count(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// Returns the number of messages on a topic not yet committed by a group.
    pub async fn lag(&self, group: &str, topic: &str) -> usize {
        let state = self.state.read().await;
        let Some(logs) = state.topics.get(topic) else {
            return 0;
        };
        logs.iter()
            .enumerate()
            .map(|(partition, log)| {
                let committed = state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0);
                log.len().saturating_sub(committed)
            })
            .sum()
    }

    /// Moves a group's committed offset back so messages are delivered again.
    pub async fn rewind(&self, group: &str, topic: &str, partition: usize, offset: usize) {
        let mut state = self.state.write().await;
        state
            .committed
            .insert((group.to_string(), topic.to_string(), partition), offset);
        drop(state);
        self.notify();
    }

    fn notify(&self) {
        self.changes.send_modify(|seq| *seq = seq.wrapping_add(1));
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    #[tracing::instrument(skip(self, envelope), fields(topic = %envelope.topic, key = %envelope.key))]
    async fn publish(&self, envelope: Envelope) -> Result<Delivery> {
        let partition = partition_for(&envelope.key, self.partitions);

        let mut state = self.state.write().await;
        let logs = state
            .topics
            .entry(envelope.topic.clone())
            .or_insert_with(|| vec![Vec::new(); self.partitions]);
        let log = &mut logs[partition];
        let offset = log.len();
        log.push(envelope.clone());
        state.history.push(envelope.clone());
        drop(state);

        metrics::counter!("bus_messages_published_total", "topic" => envelope.topic.clone())
            .increment(1);
        tracing::debug!(partition, offset, event_type = %envelope.event_type, "Message published");

        self.notify();

        Ok(Delivery {
            envelope,
            partition,
            offset,
        })
    }

    async fn poll(&self, group: &str, topic: &str, partition: usize) -> Result<Option<Delivery>> {
        if partition >= self.partitions {
            return Err(BusError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }

        let state = self.state.read().await;
        let Some(logs) = state.topics.get(topic) else {
            return Ok(None);
        };

        let offset = state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0);

        Ok(logs[partition].get(offset).map(|envelope| Delivery {
            envelope: envelope.clone(),
            partition,
            offset,
        }))
    }

    async fn commit(&self, group: &str, delivery: &Delivery) -> Result<()> {
        let topic = &delivery.envelope.topic;
        let mut state = self.state.write().await;
        let expected = state
            .committed
            .entry((group.to_string(), topic.clone(), delivery.partition))
            .or_insert(0);

        if delivery.offset < *expected {
            return Ok(());
        }
        if delivery.offset > *expected {
            return Err(BusError::OutOfOrderCommit {
                group: group.to_string(),
                topic: topic.clone(),
                partition: delivery.partition,
                expected: *expected,
                actual: delivery.offset,
            });
        }

        *expected += 1;
        Ok(())
    }

    fn partitions(&self) -> usize {
        self.partitions
    }

    fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
