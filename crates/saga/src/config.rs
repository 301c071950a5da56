//! Saga runtime tunables.

use std::time::Duration;

use event_bus::RetryPolicy;

/// Tunables for the saga runtime.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Delivery attempts per message before it is dead-lettered.
    pub max_delivery_attempts: u32,

    /// Base delay between delivery attempts.
    pub redelivery_backoff: Duration,

    /// How often the outbox relay looks for new records when idle.
    pub outbox_poll_interval: Duration,

    /// Maximum number of outbox records published per relay pass.
    pub outbox_batch_size: usize,
}

impl SagaConfig {
    /// Returns the redelivery policy for every consumer.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_delivery_attempts, self.redelivery_backoff)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            redelivery_backoff: Duration::from_millis(100),
            outbox_poll_interval: Duration::from_millis(50),
            outbox_batch_size: 100,
        }
    }
}
