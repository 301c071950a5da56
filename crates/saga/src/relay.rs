//! Outbox relay.

use std::sync::Arc;
use std::time::Duration;

use domain::{OrderStore, OutboxRecord};
use event_bus::{Envelope, EventBus, MessageId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Header carrying the saga type on every relayed message.
pub const SAGA_TYPE_HEADER: &str = "saga-type";

/// Publishes committed outbox records to the event bus.
///
/// A record is marked published only after the bus accepted it. If the
/// process stops in between, the record is published again on the next pass
/// with the same message id.
pub struct OutboxRelay<S: OrderStore + ?Sized, B: EventBus + ?Sized> {
    store: Arc<S>,
    bus: Arc<B>,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OrderStore + ?Sized + 'static,
    B: EventBus + ?Sized + 'static,
{
    /// Creates a relay.
    pub fn new(store: Arc<S>, bus: Arc<B>, batch_size: usize, poll_interval: Duration) -> Self {
        Self {
            store,
            bus,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Publishes one batch of pending records.
    ///
    /// Returns the number of records published. Records published before a
    /// failure are still marked.
    pub async fn relay_once(&self) -> Result<usize> {
        let records = self.store.pending_outbox(self.batch_size).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(records.len());
        let mut failure = None;
        for record in &records {
            match self.publish(record).await {
                Ok(()) => published.push(record.id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.store.mark_published(&published).await?;
            metrics::counter!("outbox_published_total").increment(published.len() as u64);
            tracing::debug!(count = published.len(), "Outbox records published");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(published.len()),
        }
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<()> {
        let envelope = Envelope::builder()
            .message_id(MessageId::from_uuid(record.id))
            .topic(record.event.topic.clone())
            .key(record.event.key.clone())
            .event_type(record.event.event_type.clone())
            .timestamp(record.created_at)
            .payload_raw(record.event.payload.clone())
            .header(SAGA_TYPE_HEADER, crate::order_fulfillment::SAGA_TYPE)
            .build()?;

        self.bus.publish(envelope).await?;
        Ok(())
    }

    /// Spawns a task that relays until `shutdown` flips.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!("Outbox relay started");

            while !*shutdown.borrow() {
                match self.relay_once().await {
                    Ok(n) if n >= self.batch_size => continue,
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Outbox relay pass failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Outbox relay stopped");
        })
    }
}
