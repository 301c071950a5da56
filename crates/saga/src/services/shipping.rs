//! Simulated shipping service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::CorrelationId;
use event_bus::{Envelope, EventBus, MessageHandler};
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::events::{self, ShippingRequest, ShippingResult};
use crate::order_fulfillment;

#[derive(Debug, Default)]
struct ShippingState {
    results: HashMap<CorrelationId, ShippingResult>,
    next_id: u32,
    fail_shipments: bool,
}

/// In-process shipping service.
///
/// Creates a shipment with a `TRACK-…` tracking number for every request
/// unless failures are switched on. Requests are deduplicated by correlation
/// id.
pub struct ShippingSimulator<B: EventBus + ?Sized> {
    bus: Arc<B>,
    state: Arc<RwLock<ShippingState>>,
}

impl<B: EventBus + ?Sized> Clone for ShippingSimulator<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            state: Arc::clone(&self.state),
        }
    }
}

impl<B: EventBus + ?Sized> ShippingSimulator<B> {
    /// Creates a simulator publishing its results on `bus`.
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
            state: Arc::default(),
        }
    }

    /// Fails every shipment while set.
    pub async fn set_fail_shipments(&self, fail: bool) {
        self.state.write().await.fail_shipments = fail;
    }

    /// Returns the number of shipments created.
    pub async fn shipment_count(&self) -> usize {
        self.state
            .read()
            .await
            .results
            .values()
            .filter(|r| r.shipment_id.is_some())
            .count()
    }

    async fn ship(&self, request: ShippingRequest) -> Result<(), SagaError> {
        let result = {
            let mut state = self.state.write().await;
            if let Some(previous) = state.results.get(&request.correlation_id) {
                tracing::info!(order_id = %request.order_id, "Duplicate shipping request");
                previous.clone()
            } else {
                let result = if state.fail_shipments {
                    ShippingResult::failed(&request, "Carrier unavailable")
                } else {
                    state.next_id += 1;
                    ShippingResult::shipped(
                        &request,
                        format!("SHP-{:06}", state.next_id),
                        format!("TRACK-{}", Utc::now().timestamp_millis()),
                    )
                };
                state
                    .results
                    .insert(request.correlation_id.clone(), result.clone());
                result
            }
        };

        tracing::info!(
            order_id = %result.order_id,
            status = ?result.status,
            city = %request.address.city,
            "Shipment processed"
        );
        events::publish(self.bus.as_ref(), &result).await?;
        Ok(())
    }
}

#[async_trait]
impl<B: EventBus + ?Sized + 'static> MessageHandler for ShippingSimulator<B> {
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "shipping-simulator"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), SagaError> {
        if envelope.topic != order_fulfillment::SHIPPING_REQUEST {
            tracing::warn!(topic = %envelope.topic, "Unexpected topic for shipping service");
            return Ok(());
        }
        match events::decode::<ShippingRequest>(self.name(), envelope) {
            Some(request) => self.ship(request).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, UserId};
    use domain::{Order, OrderItem, ShippingAddress};
    use event_bus::{EventBusExt, InMemoryEventBus};

    use crate::events::{SagaMessage, StepStatus};

    async fn request_envelope(bus: &InMemoryEventBus) -> Envelope {
        let order = Order::new(
            UserId::new(1),
            vec![OrderItem::new("P1", 1, Money::from_dollars(10))],
        )
        .unwrap();
        let request = ShippingRequest::for_order(&order, ShippingAddress::default());
        bus.publish_event(
            ShippingRequest::TOPIC,
            &order.id().to_string(),
            ShippingRequest::EVENT_TYPE,
            &request,
        )
        .await
        .unwrap()
        .envelope
    }

    async fn results(bus: &InMemoryEventBus) -> Vec<ShippingResult> {
        bus.published(order_fulfillment::SHIPPING_RESPONSE)
            .await
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_ship_assigns_tracking_number() {
        let bus = Arc::new(InMemoryEventBus::new());
        let shipping = ShippingSimulator::new(Arc::clone(&bus));
        let request = request_envelope(&bus).await;

        shipping.handle(&request).await.unwrap();
        shipping.handle(&request).await.unwrap();

        let results = results(&bus).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].status, StepStatus::Success);
        assert_eq!(results[0].shipment_id.as_deref(), Some("SHP-000001"));
        assert!(
            results[0]
                .tracking_number
                .as_deref()
                .is_some_and(|t| t.starts_with("TRACK-"))
        );
        assert_eq!(shipping.shipment_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_shipment() {
        let bus = Arc::new(InMemoryEventBus::new());
        let shipping = ShippingSimulator::new(Arc::clone(&bus));
        shipping.set_fail_shipments(true).await;

        shipping.handle(&request_envelope(&bus).await).await.unwrap();

        let results = results(&bus).await;
        assert_eq!(results[0].status, StepStatus::Failed);
        assert_eq!(results[0].failure_reason.as_deref(), Some("Carrier unavailable"));
        assert_eq!(shipping.shipment_count().await, 0);
    }
}
