//! Notification sink.

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use event_bus::{Envelope, MessageHandler};
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::events::{self, Notification, Priority};

/// Records every notification it receives.
///
/// Stands in for an email/SMS gateway. High-priority notifications are
/// logged as warnings so operators see them.
#[derive(Debug, Clone, Default)]
pub struct NotificationSink {
    received: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every notification received so far.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.received.read().await.clone()
    }

    /// Returns the notifications received for one order.
    pub async fn for_order(&self, order_id: OrderId) -> Vec<Notification> {
        self.received
            .read()
            .await
            .iter()
            .filter(|n| n.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageHandler for NotificationSink {
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "notification-sink"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), SagaError> {
        let Some(notification) = events::decode::<Notification>(self.name(), envelope) else {
            return Ok(());
        };

        match notification.priority {
            Priority::High => tracing::warn!(
                order_id = %notification.order_id,
                notification_type = ?notification.notification_type,
                message = %notification.message,
                "High-priority notification"
            ),
            Priority::Normal => tracing::info!(
                order_id = %notification.order_id,
                notification_type = ?notification.notification_type,
                "Notification sent"
            ),
        }

        self.received.write().await.push(notification);
        Ok(())
    }
}
