//! Bus handlers feeding collaborator results into the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderStore;
use event_bus::{Envelope, MessageHandler};

use crate::error::SagaError;
use crate::events::{self, InventoryReserveResult, PaymentResult, ShippingResult};
use crate::order_fulfillment;
use crate::orchestrator::OrderSaga;

/// Routes payment, inventory and shipping responses to the orchestrator.
///
/// Charge and refund results share a topic and are told apart by status.
/// Store errors are returned so the bus redelivers the message.
pub struct SagaResultHandler<S: OrderStore + ?Sized> {
    saga: Arc<OrderSaga<S>>,
}

impl<S: OrderStore + ?Sized> SagaResultHandler<S> {
    pub fn new(saga: Arc<OrderSaga<S>>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl<S: OrderStore + ?Sized + 'static> MessageHandler for SagaResultHandler<S> {
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "order-saga"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), SagaError> {
        match envelope.topic.as_str() {
            order_fulfillment::PAYMENT_RESPONSE => {
                let Some(result) = events::decode::<PaymentResult>(self.name(), envelope) else {
                    return Ok(());
                };
                if result.status.is_refund() {
                    self.saga.on_refund_result(&result).await?;
                } else {
                    self.saga.on_payment_result(&result).await?;
                }
            }
            order_fulfillment::INVENTORY_RESERVE_RESPONSE => {
                let Some(result) = events::decode::<InventoryReserveResult>(self.name(), envelope)
                else {
                    return Ok(());
                };
                self.saga.on_inventory_result(&result).await?;
            }
            order_fulfillment::SHIPPING_RESPONSE => {
                let Some(result) = events::decode::<ShippingResult>(self.name(), envelope) else {
                    return Ok(());
                };
                self.saga.on_shipping_result(&result).await?;
            }
            other => {
                tracing::warn!(topic = other, "Unexpected topic for order saga");
            }
        }
        Ok(())
    }
}
