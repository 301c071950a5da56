use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{Envelope, EventBus, Result};

/// Interval at which an idle partition task re-polls even without a wakeup.
const IDLE_REPOLL: Duration = Duration::from_millis(500);

/// Processes messages delivered to a consumer group.
///
/// Handlers must be idempotent: a message is delivered at least once and may
/// be handed out again if the process stops before it is committed.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Error type returned when processing fails.
    type Error: std::fmt::Display + Send;

    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handles one message. Returning an error triggers a redelivery.
    async fn handle(&self, envelope: &Envelope) -> std::result::Result<(), Self::Error>;
}

/// Redelivery policy for failed messages.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts before a message is dead-lettered.
    pub max_attempts: u32,

    /// Base delay between attempts. Attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

/// A consumer group member subscribed to one topic.
///
/// Reads every partition of the topic in order. A message is committed only
/// after its handler succeeded, or after it exhausted its attempts and was
/// dead-lettered.
pub struct Consumer<B: EventBus + ?Sized, H: MessageHandler> {
    bus: Arc<B>,
    handler: Arc<H>,
    group: String,
    topic: String,
    retry: RetryPolicy,
}

impl<B, H> Consumer<B, H>
where
    B: EventBus + ?Sized + 'static,
    H: MessageHandler + 'static,
{
    /// Creates a consumer for `topic` in consumer group `group`.
    pub fn new(
        bus: Arc<B>,
        handler: Arc<H>,
        group: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            handler,
            group: group.into(),
            topic: topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the redelivery policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the subscribed topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the consumer group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Processes at most one message from a partition.
    ///
    /// Returns `true` if a message was consumed (handled or dead-lettered).
    pub async fn poll_once(&self, partition: usize) -> Result<bool> {
        let Some(delivery) = self.bus.poll(&self.group, &self.topic, partition).await? else {
            return Ok(false);
        };

        let envelope = &delivery.envelope;
        let mut attempt = 1;
        loop {
            match self.handler.handle(envelope).await {
                Ok(()) => break,
                Err(e) if attempt < self.retry.max_attempts => {
                    tracing::warn!(
                        handler = self.handler.name(),
                        topic = %self.topic,
                        message_id = %envelope.message_id,
                        attempt,
                        error = %e,
                        "Handler failed, redelivering"
                    );
                    metrics::counter!("bus_redeliveries_total", "topic" => self.topic.clone())
                        .increment(1);
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        handler = self.handler.name(),
                        topic = %self.topic,
                        message_id = %envelope.message_id,
                        key = %envelope.key,
                        attempts = attempt,
                        payload = %envelope.payload,
                        error = %e,
                        "Message dead-lettered after exhausting delivery attempts"
                    );
                    metrics::counter!("bus_dead_letters_total", "topic" => self.topic.clone())
                        .increment(1);
                    break;
                }
            }
        }

        self.bus.commit(&self.group, &delivery).await?;
        Ok(true)
    }

    /// Consumes every pending message on every partition.
    ///
    /// Returns the number of messages consumed.
    pub async fn drain(&self) -> Result<usize> {
        let mut consumed = 0;
        for partition in 0..self.bus.partitions() {
            while self.poll_once(partition).await? {
                consumed += 1;
            }
        }
        Ok(consumed)
    }

    /// Spawns one task per partition that consumes until `shutdown` flips.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.bus.partitions())
            .map(|partition| {
                let consumer = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { consumer.run_partition(partition, shutdown).await })
            })
            .collect()
    }

    async fn run_partition(&self, partition: usize, mut shutdown: watch::Receiver<bool>) {
        let mut changes = self.bus.subscribe_changes();
        tracing::debug!(
            handler = self.handler.name(),
            topic = %self.topic,
            partition,
            "Partition consumer started"
        );

        while !*shutdown.borrow() {
            changes.borrow_and_update();

            loop {
                match self.poll_once(partition).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!(
                            handler = self.handler.name(),
                            topic = %self.topic,
                            partition,
                            error = %e,
                            "Partition consumer failed"
                        );
                        break;
                    }
                }
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(IDLE_REPOLL) => {}
            }
        }

        tracing::debug!(
            handler = self.handler.name(),
            topic = %self.topic,
            partition,
            "Partition consumer stopped"
        );
    }
}
