//! Simulated payment service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{CorrelationId, Money, OrderId};
use event_bus::{Envelope, EventBus, MessageHandler};
use tokio::sync::RwLock;

use crate::error::SagaError;
use crate::events::{self, PaymentRequest, PaymentResult, RefundRequest, fallback_transaction_ref};
use crate::order_fulfillment;

#[derive(Debug, Default)]
struct PaymentState {
    /// Successful charges by order.
    charges: HashMap<OrderId, (String, Money)>,

    /// Charge results by correlation id.
    charge_results: HashMap<CorrelationId, PaymentResult>,

    /// Refund results by correlation id.
    refund_results: HashMap<CorrelationId, PaymentResult>,

    decline_charges: bool,
    fail_refunds: bool,
}

/// In-process payment service.
///
/// Charges succeed unless declining is switched on. A refund succeeds if a
/// successful charge exists for the order. Requests are deduplicated by
/// correlation id: a redelivered request is answered with the result
/// published the first time.
pub struct PaymentSimulator<B: EventBus + ?Sized> {
    bus: Arc<B>,
    state: Arc<RwLock<PaymentState>>,
}

impl<B: EventBus + ?Sized> Clone for PaymentSimulator<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            state: Arc::clone(&self.state),
        }
    }
}

impl<B: EventBus + ?Sized> PaymentSimulator<B> {
    /// Creates a simulator publishing its results on `bus`.
    pub fn new(bus: Arc<B>) -> Self {
        Self {
            bus,
            state: Arc::default(),
        }
    }

    /// Declines every charge while set.
    pub async fn set_decline_charges(&self, decline: bool) {
        self.state.write().await.decline_charges = decline;
    }

    /// Fails every refund while set.
    pub async fn set_fail_refunds(&self, fail: bool) {
        self.state.write().await.fail_refunds = fail;
    }

    /// Returns the number of charges that have not been refunded.
    pub async fn charge_count(&self) -> usize {
        self.state.read().await.charges.len()
    }

    /// Returns the number of refund requests processed.
    pub async fn refund_count(&self) -> usize {
        self.state.read().await.refund_results.len()
    }

    async fn charge(&self, request: PaymentRequest) -> Result<(), SagaError> {
        let result = {
            let mut state = self.state.write().await;
            if let Some(previous) = state.charge_results.get(&request.correlation_id) {
                tracing::info!(order_id = %request.order_id, "Duplicate payment request");
                previous.clone()
            } else {
                let result = if state.decline_charges {
                    PaymentResult::declined(&request, "Payment declined")
                } else {
                    let transaction_ref = fallback_transaction_ref(request.order_id);
                    state
                        .charges
                        .insert(request.order_id, (transaction_ref.clone(), request.amount));
                    PaymentResult::charged(&request, transaction_ref)
                };
                state
                    .charge_results
                    .insert(request.correlation_id.clone(), result.clone());
                result
            }
        };

        tracing::info!(order_id = %result.order_id, status = ?result.status, "Payment processed");
        events::publish(self.bus.as_ref(), &result).await?;
        Ok(())
    }

    async fn refund(&self, request: RefundRequest) -> Result<(), SagaError> {
        let result = {
            let mut state = self.state.write().await;
            if let Some(previous) = state.refund_results.get(&request.correlation_id) {
                tracing::info!(order_id = %request.order_id, "Duplicate refund request");
                previous.clone()
            } else {
                let result = if state.fail_refunds {
                    PaymentResult::refund_failed(&request, "Payment provider unavailable")
                } else if state.charges.remove(&request.order_id).is_some() {
                    PaymentResult::refunded(&request)
                } else {
                    PaymentResult::refund_failed(&request, "No successful charge found")
                };
                state
                    .refund_results
                    .insert(request.correlation_id.clone(), result.clone());
                result
            }
        };

        tracing::info!(
            order_id = %result.order_id,
            status = ?result.status,
            reason = %request.reason,
            "Refund processed"
        );
        events::publish(self.bus.as_ref(), &result).await?;
        Ok(())
    }
}

#[async_trait]
impl<B: EventBus + ?Sized + 'static> MessageHandler for PaymentSimulator<B> {
    type Error = SagaError;

    fn name(&self) -> &'static str {
        "payment-simulator"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), SagaError> {
        match envelope.topic.as_str() {
            order_fulfillment::PAYMENT_REQUEST => {
                match events::decode::<PaymentRequest>(self.name(), envelope) {
                    Some(request) => self.charge(request).await,
                    None => Ok(()),
                }
            }
            order_fulfillment::REFUND_REQUEST => {
                match events::decode::<RefundRequest>(self.name(), envelope) {
                    Some(request) => self.refund(request).await,
                    None => Ok(()),
                }
            }
            other => {
                tracing::warn!(topic = other, "Unexpected topic for payment service");
                Ok(())
            }
        }
    }
}
