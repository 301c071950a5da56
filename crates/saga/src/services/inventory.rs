//! Inventory service bus adapter.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{Envelope, EventBus, MessageHandler};
use inventory::{
    ReservationHandler, ReservationLedger, ReservationRequest, RestoreOutcome, RestoreRequest,
    StockStore,
};

use crate::error::SagaError;
use crate::events::{self, InventoryReserveRequest, InventoryReserveResult, InventoryRestoreRequest};
use crate::order_fulfillment;

/// Serves reservation and restore requests from the bus.
///
/// The reservation outcome is in the ledger before the response is
/// published. If publishing fails, the redelivered request is answered from
/// the ledger and stock is not touched again.
pub struct InventoryService<S, L, B>
where
    S: StockStore + ?Sized,
    L: ReservationLedger + ?Sized,
    B: EventBus + ?Sized,
{
    handler: ReservationHandler<S, L>,
    bus: Arc<B>,
}

impl<S, L, B> InventoryService<S, L, B>
where
    S: StockStore + ?Sized,
    L: ReservationLedger + ?Sized,
    B: EventBus + ?Sized,
{
    pub fn new(handler: ReservationHandler<S, L>, bus: Arc<B>) -> Self {
        Self { handler, bus }
    }

    /// Returns the reservation handler.
    pub fn handler(&self) -> &ReservationHandler<S, L> {
        &self.handler
    }

    async fn reserve(&self, request: InventoryReserveRequest) -> Result<(), SagaError> {
        let outcome = self
            .handler
            .reserve(&ReservationRequest {
                order_id: request.order_id,
                correlation_id: request.correlation_id.clone(),
                items: request.items.clone(),
            })
            .await?;

        let response = InventoryReserveResult::from_outcome(&request, outcome);
        events::publish(self.bus.as_ref(), &response).await?;
        Ok(())
    }

    async fn restore(&self, request: InventoryRestoreRequest) -> Result<(), SagaError> {
        let outcome = self
            .handler
            .restore(&RestoreRequest {
                order_id: request.order_id,
                correlation_id: request.correlation_id,
                items: request.items,
                reason: request.reason.to_string(),
            })
            .await?;

        if let RestoreOutcome::Applied { failed } = outcome
            && !failed.is_empty()
        {
            tracing::error!(
                order_id = %request.order_id,
                failed_lines = failed.len(),
                manual_intervention = true,
                "Stock restore incomplete"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<S, L, B> MessageHandler for InventoryService<S, L, B>
where
    S: StockStore + ?Sized + 'static,
    L: ReservationLedger + ?Sized + 'static,
    B: EventBus + ?Sized + 'static,
{
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "inventory-service"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), SagaError> {
        match envelope.topic.as_str() {
            order_fulfillment::INVENTORY_RESERVE_REQUEST => {
                match events::decode::<InventoryReserveRequest>(self.name(), envelope) {
                    Some(request) => self.reserve(request).await,
                    None => Ok(()),
                }
            }
            order_fulfillment::INVENTORY_RESTORE_REQUEST => {
                match events::decode::<InventoryRestoreRequest>(self.name(), envelope) {
                    Some(request) => self.restore(request).await,
                    None => Ok(()),
                }
            }
            other => {
                tracing::warn!(topic = other, "Unexpected topic for inventory service");
                Ok(())
            }
        }
    }
}
