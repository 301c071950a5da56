//! Order saga orchestrator.

use std::sync::Arc;
use std::time::Instant;

use common::{OrderId, UserId};
use domain::{
    DeliveryParameters, DomainError, Order, OrderError, OrderItem, OrderStatus, OrderStore,
    OutboundEvent, SagaStep,
};

use crate::error::{Result, SagaError};
use crate::events::{
    CompensationReason, InventoryReserveRequest, InventoryReserveResult, InventoryRestoreRequest,
    Notification, PaymentRequest, PaymentResult, PaymentStatus, RefundRequest, SagaMessage,
    ShippingRequest, ShippingResult, StepStatus, fallback_transaction_ref,
};
use crate::locks::OrderLocks;
use crate::order_fulfillment;

/// Number of times a read-modify-write is retried after losing an optimistic
/// version check.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Reason recorded when the owner cancels without giving one.
const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

/// A checkout submission.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub idempotency_key: Option<String>,
    pub checkout_batch_id: Option<String>,
    pub delivery: Option<DeliveryParameters>,
}

impl Checkout {
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Self {
        Self {
            user_id,
            items,
            idempotency_key: None,
            checkout_batch_id: None,
            delivery: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_checkout_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.checkout_batch_id = Some(batch_id.into());
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryParameters) -> Self {
        self.delivery = Some(delivery);
        self
    }
}

/// What happened to an inbound result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The result was applied; the order is now in this status.
    Applied(OrderStatus),

    /// The result for this step was already applied earlier.
    Duplicate,

    /// The result does not apply to the order in its current status, or the
    /// order does not exist.
    Ignored,
}

/// Decision taken by a step on a freshly loaded order.
enum Decision {
    /// Commit the mutated order together with these outbound events.
    Commit(Vec<OutboundEvent>),

    /// Leave the order untouched.
    Skip,
}

/// Outcome of one locked read-modify-write.
enum Outcome {
    Committed(Order),
    Duplicate,
    Skipped,
    Missing,
}

/// Drives each order through its fulfillment saga.
///
/// Every operation loads the order under its per-order lock, decides the next
/// status and the outbound requests, and commits both in one store call. The
/// outbox relay publishes the requests afterwards.
///
/// Result handlers record their step on the order in the same commit. A
/// redelivered result finds its step recorded and is dropped, so no request
/// or compensation is ever emitted twice.
pub struct OrderSaga<S: OrderStore + ?Sized> {
    store: Arc<S>,
    locks: OrderLocks,
}

impl<S: OrderStore + ?Sized> OrderSaga<S> {
    /// Creates an orchestrator over the given order store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: OrderLocks::new(),
        }
    }

    /// Returns the order store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates an order from a cart and starts its saga.
    ///
    /// A submission whose idempotency key matches an existing order returns
    /// that order instead of creating a second one. If the existing order's
    /// saga never started, it is started now.
    #[tracing::instrument(skip(self, checkout), fields(user_id = %checkout.user_id))]
    pub async fn checkout(&self, checkout: Checkout) -> Result<Order> {
        let key = checkout.idempotency_key.filter(|k| !k.is_empty());

        if let Some(key) = key.as_deref()
            && let Some(existing) = self.store.find_by_idempotency_key(key).await?
        {
            tracing::info!(order_id = %existing.id(), "Duplicate checkout submission");
            metrics::counter!("saga_duplicate_checkouts_total").increment(1);
            return self.resume(existing).await;
        }

        let order = Order::new(checkout.user_id, checkout.items)?
            .with_idempotency_key(key)
            .with_checkout_batch_id(checkout.checkout_batch_id)
            .with_delivery(checkout.delivery);

        let order = match self.store.create(order).await {
            Ok(order) => order,
            Err(DomainError::DuplicateIdempotencyKey(key)) => {
                tracing::info!(idempotency_key = %key, "Concurrent checkout with the same key");
                match self.store.find_by_idempotency_key(&key).await? {
                    Some(existing) => return self.resume(existing).await,
                    None => return Err(DomainError::DuplicateIdempotencyKey(key).into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            order_id = %order.id(),
            total = %order.total_price(),
            items = order.items().len(),
            "Order created"
        );
        self.initiate(order.id()).await?;
        self.get_order(order.id()).await
    }

    async fn resume(&self, existing: Order) -> Result<Order> {
        if existing.status() != OrderStatus::Created {
            return Ok(existing);
        }
        self.initiate(existing.id()).await?;
        self.get_order(existing.id()).await
    }

    /// Starts the saga: `CREATED → PENDING` and requests payment.
    #[tracing::instrument(skip(self))]
    pub async fn initiate(&self, order_id: OrderId) -> Result<Handled> {
        let handled = self
            .run_step(order_id, None, |order| {
                if order.status() != OrderStatus::Created {
                    tracing::debug!(status = %order.status(), "Saga already started");
                    return Ok(Decision::Skip);
                }
                order.transition(OrderStatus::Pending)?;
                Ok(Decision::Commit(vec![
                    PaymentRequest::for_order(order).to_outbound()?,
                ]))
            })
            .await?;

        if let Handled::Applied(_) = handled {
            metrics::counter!("saga_started_total").increment(1);
        }
        Ok(handled)
    }

    /// Applies a charge result.
    ///
    /// A successful charge that arrives after the order was cancelled is
    /// refunded.
    #[tracing::instrument(skip(self, result), fields(order_id = %result.order_id, status = ?result.status))]
    pub async fn on_payment_result(&self, result: &PaymentResult) -> Result<Handled> {
        self.run_step(result.order_id, Some(SagaStep::Payment), |order| {
            match (order.status(), result.status) {
                (OrderStatus::Pending, PaymentStatus::Success) => {
                    order.set_transaction_ref(transaction_ref(order, result));
                    order.transition(OrderStatus::PaymentCompleted)?;
                    Ok(Decision::Commit(vec![
                        InventoryReserveRequest::for_order(order).to_outbound()?,
                    ]))
                }
                (OrderStatus::Pending, PaymentStatus::Failed) => {
                    order.set_failure_reason(
                        result
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "Payment failed".to_string()),
                    );
                    order.transition(OrderStatus::Failed)?;
                    Ok(Decision::Commit(Vec::new()))
                }
                (OrderStatus::Cancelled, PaymentStatus::Success) if !order.refund_requested() => {
                    tracing::warn!("Payment succeeded after cancellation, refunding");
                    order.set_transaction_ref(transaction_ref(order, result));
                    order.mark_refund_requested();
                    Ok(Decision::Commit(vec![
                        RefundRequest::for_order(order, CompensationReason::UserCancelled)
                            .to_outbound()?,
                    ]))
                }
                (OrderStatus::Cancelled, PaymentStatus::Failed) => Ok(Decision::Commit(Vec::new())),
                (status, outcome) => {
                    tracing::warn!(status = %status, outcome = ?outcome, "Payment result ignored");
                    Ok(Decision::Skip)
                }
            }
        })
        .await
    }

    /// Applies a reservation result.
    ///
    /// On failure the order is refunded; nothing was reserved, so there is
    /// nothing to restore. A successful reservation that arrives after the
    /// order was cancelled is restored, even if the refund result has already
    /// moved the order past `CANCELLED`.
    #[tracing::instrument(skip(self, result), fields(order_id = %result.order_id, status = ?result.status))]
    pub async fn on_inventory_result(&self, result: &InventoryReserveResult) -> Result<Handled> {
        self.run_step(
            result.order_id,
            Some(SagaStep::InventoryReservation),
            |order| match (order.status(), result.status) {
                (OrderStatus::PaymentCompleted, StepStatus::Success) => {
                    order.transition(OrderStatus::InventoryReserved)?;
                    let address = order.take_delivery();
                    Ok(Decision::Commit(vec![
                        ShippingRequest::for_order(order, address).to_outbound()?,
                    ]))
                }
                (OrderStatus::PaymentCompleted, StepStatus::Failed) => {
                    order.set_failure_reason(
                        result
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "Inventory reservation failed".to_string()),
                    );
                    order.mark_refund_requested();
                    order.transition(OrderStatus::OutOfStock)?;
                    Ok(Decision::Commit(vec![
                        RefundRequest::for_order(order, CompensationReason::InventoryFailed)
                            .to_outbound()?,
                    ]))
                }
                (status, StepStatus::Success) if order.was_cancelled() => {
                    tracing::warn!(
                        status = %status,
                        "Stock reserved after cancellation, restoring"
                    );
                    Ok(Decision::Commit(vec![
                        InventoryRestoreRequest::for_order(
                            order,
                            CompensationReason::UserCancelled,
                        )
                        .to_outbound()?,
                    ]))
                }
                (_, StepStatus::Failed) if order.was_cancelled() => {
                    Ok(Decision::Commit(Vec::new()))
                }
                (status, outcome) => {
                    tracing::warn!(status = %status, outcome = ?outcome, "Inventory result ignored");
                    Ok(Decision::Skip)
                }
            },
        )
        .await
    }

    /// Applies a shipment result.
    ///
    /// A failed shipment restores the stock and refunds the payment.
    #[tracing::instrument(skip(self, result), fields(order_id = %result.order_id, status = ?result.status))]
    pub async fn on_shipping_result(&self, result: &ShippingResult) -> Result<Handled> {
        self.run_step(result.order_id, Some(SagaStep::Shipping), |order| {
            match (order.status(), result.status) {
                (OrderStatus::InventoryReserved, StepStatus::Success) => {
                    order.set_shipment(result.shipment_id.clone(), result.tracking_number.clone());
                    order.transition(OrderStatus::Confirmed)?;
                    Ok(Decision::Commit(vec![
                        Notification::confirmed(order).to_outbound()?,
                    ]))
                }
                (OrderStatus::InventoryReserved, StepStatus::Failed) => {
                    order.set_failure_reason(
                        result
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "Shipping failed".to_string()),
                    );
                    order.mark_refund_requested();
                    order.transition(OrderStatus::Failed)?;
                    Ok(Decision::Commit(vec![
                        InventoryRestoreRequest::for_order(
                            order,
                            CompensationReason::ShippingFailed,
                        )
                        .to_outbound()?,
                        RefundRequest::for_order(order, CompensationReason::ShippingFailed)
                            .to_outbound()?,
                    ]))
                }
                (_, outcome) if order.was_cancelled() => {
                    tracing::warn!(
                        outcome = ?outcome,
                        shipment_id = result.shipment_id.as_deref().unwrap_or(""),
                        "Shipping result for a cancelled order"
                    );
                    Ok(Decision::Commit(Vec::new()))
                }
                (status, outcome) => {
                    tracing::warn!(status = %status, outcome = ?outcome, "Shipping result ignored");
                    Ok(Decision::Skip)
                }
            }
        })
        .await
    }

    /// Applies a refund result to a compensated order.
    ///
    /// A failed refund parks the order in `REFUND_FAILED` and notifies
    /// operators. There is no automated recovery from there.
    #[tracing::instrument(skip(self, result), fields(order_id = %result.order_id, status = ?result.status))]
    pub async fn on_refund_result(&self, result: &PaymentResult) -> Result<Handled> {
        let reason = result
            .failure_reason
            .clone()
            .unwrap_or_else(|| "Refund failed".to_string());

        let handled = self
            .run_step(result.order_id, Some(SagaStep::Refund), |order| {
                let compensated = matches!(
                    order.status(),
                    OrderStatus::OutOfStock | OrderStatus::Failed | OrderStatus::Cancelled
                );
                if !order.refund_requested() || !compensated {
                    tracing::warn!(
                        status = %order.status(),
                        refund_requested = order.refund_requested(),
                        "Refund result ignored"
                    );
                    return Ok(Decision::Skip);
                }

                match result.status {
                    PaymentStatus::Refunded => {
                        order.transition(OrderStatus::Refunded)?;
                        Ok(Decision::Commit(Vec::new()))
                    }
                    PaymentStatus::RefundFailed => {
                        order.set_failure_reason(reason.clone());
                        order.transition(OrderStatus::RefundFailed)?;
                        Ok(Decision::Commit(vec![
                            Notification::refund_failed(order, &reason).to_outbound()?,
                        ]))
                    }
                    other => {
                        tracing::warn!(outcome = ?other, "Charge result on the refund path ignored");
                        Ok(Decision::Skip)
                    }
                }
            })
            .await?;

        if handled == Handled::Applied(OrderStatus::RefundFailed) {
            tracing::error!(
                order_id = %result.order_id,
                reason = %reason,
                manual_intervention = true,
                "Payment refund failed"
            );
        }
        Ok(handled)
    }

    /// Cancels an order on behalf of its owner.
    ///
    /// Compensations depend on how far the saga got: stock and payment from
    /// `INVENTORY_RESERVED`, payment only from `PAYMENT_COMPLETED`, nothing
    /// otherwise. A step still in flight is compensated when its result
    /// arrives.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` for an unknown order, `OrderError::NotOwner` if the
    /// requester does not own it, and `OrderError::NotCancellable` for
    /// `CONFIRMED`, `FAILED`, `CANCELLED` and `REFUNDED` orders. Rejected
    /// cancellations change nothing and emit nothing.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        user_id: UserId,
        reason: Option<&str>,
    ) -> Result<Order> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());

        let outcome = self
            .commit_locked(order_id, None, |order| {
                if !order.is_owned_by(user_id) {
                    return Err(OrderError::NotOwner { user_id }.into());
                }

                let status = order.status();
                if !status.can_cancel() {
                    return Err(OrderError::NotCancellable { status }.into());
                }

                let mut outbox = Vec::new();
                match status {
                    OrderStatus::InventoryReserved => {
                        outbox.push(
                            InventoryRestoreRequest::for_order(
                                order,
                                CompensationReason::UserCancelled,
                            )
                            .to_outbound()?,
                        );
                        order.mark_refund_requested();
                        outbox.push(
                            RefundRequest::for_order(order, CompensationReason::UserCancelled)
                                .to_outbound()?,
                        );
                    }
                    OrderStatus::PaymentCompleted => {
                        order.mark_refund_requested();
                        outbox.push(
                            RefundRequest::for_order(order, CompensationReason::UserCancelled)
                                .to_outbound()?,
                        );
                    }
                    _ => {}
                }

                let refund_pending =
                    order.refund_requested() && status != OrderStatus::RefundFailed;
                order.set_failure_reason(reason.unwrap_or(DEFAULT_CANCEL_REASON));
                order.transition(OrderStatus::Cancelled)?;
                outbox.push(Notification::cancelled(order, reason, refund_pending).to_outbound()?);

                Ok(Decision::Commit(outbox))
            })
            .await?;

        match outcome {
            Outcome::Committed(order) => {
                tracing::info!(order_id = %order_id, "Order cancelled");
                Ok(order)
            }
            Outcome::Missing => Err(SagaError::OrderNotFound(order_id)),
            Outcome::Duplicate | Outcome::Skipped => self.get_order(order_id).await,
        }
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Lists the orders of a user, newest first.
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_for_user(user_id).await?)
    }

    async fn run_step<F>(
        &self,
        order_id: OrderId,
        step: Option<SagaStep>,
        decide: F,
    ) -> Result<Handled>
    where
        F: FnMut(&mut Order) -> Result<Decision> + Send,
    {
        let handled = match self.commit_locked(order_id, step, decide).await? {
            Outcome::Committed(order) => Handled::Applied(order.status()),
            Outcome::Duplicate => Handled::Duplicate,
            Outcome::Skipped => {
                metrics::counter!("saga_ignored_results_total").increment(1);
                Handled::Ignored
            }
            Outcome::Missing => {
                tracing::warn!(order_id = %order_id, "Message for unknown order ignored");
                metrics::counter!("saga_ignored_results_total").increment(1);
                Handled::Ignored
            }
        };
        Ok(handled)
    }

    /// Loads the order under its lock, lets `decide` mutate it, and commits
    /// the result with its outbound events.
    ///
    /// `decide` runs again on a fresh copy if the commit loses a version check.
    async fn commit_locked<F>(
        &self,
        order_id: OrderId,
        step: Option<SagaStep>,
        mut decide: F,
    ) -> Result<Outcome>
    where
        F: FnMut(&mut Order) -> Result<Decision> + Send,
    {
        let _guard = self.locks.lock(order_id).await;
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let Some(mut order) = self.store.get(order_id).await? else {
                return Ok(Outcome::Missing);
            };

            if let Some(step) = step
                && order.has_handled(step)
            {
                tracing::info!(order_id = %order_id, step = %step, "Duplicate result ignored");
                metrics::counter!("saga_duplicate_results_total", "step" => step.as_str())
                    .increment(1);
                return Ok(Outcome::Duplicate);
            }

            let from = order.status();
            let outbox = match decide(&mut order)? {
                Decision::Commit(outbox) => outbox,
                Decision::Skip => return Ok(Outcome::Skipped),
            };
            if let Some(step) = step {
                order.record_step(step);
            }

            let compensations: Vec<&'static str> =
                outbox.iter().filter_map(compensation_kind).collect();

            match self.store.commit(order, outbox).await {
                Ok(committed) => {
                    let to = committed.status();
                    if from != to {
                        tracing::info!(
                            order_id = %order_id,
                            from = %from,
                            to = %to,
                            "Order status changed"
                        );
                        metrics::counter!("saga_transitions_total", "to" => to.as_str())
                            .increment(1);
                    }
                    for kind in compensations {
                        metrics::counter!("saga_compensations_total", "kind" => kind).increment(1);
                    }
                    metrics::histogram!("saga_handler_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return Ok(Outcome::Committed(committed));
                }
                Err(DomainError::ConcurrencyConflict { expected, actual, .. })
                    if attempt < MAX_COMMIT_ATTEMPTS =>
                {
                    tracing::warn!(
                        order_id = %order_id,
                        expected = expected.as_i64(),
                        actual = actual.as_i64(),
                        attempt,
                        "Order changed concurrently, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn transaction_ref(order: &Order, result: &PaymentResult) -> String {
    result
        .transaction_ref
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_transaction_ref(order.id()))
}

fn compensation_kind(event: &OutboundEvent) -> Option<&'static str> {
    match event.topic.as_str() {
        order_fulfillment::REFUND_REQUEST => Some("refund"),
        order_fulfillment::INVENTORY_RESTORE_REQUEST => Some("restore"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::{InMemoryOrderStore, OutboxRecord};

    fn saga() -> (OrderSaga<InMemoryOrderStore>, Arc<InMemoryOrderStore>) {
        let store = Arc::new(InMemoryOrderStore::new());
        (OrderSaga::new(Arc::clone(&store)), store)
    }

    fn cart() -> Checkout {
        Checkout::new(
            UserId::new(1),
            vec![OrderItem::new("P1", 2, Money::from_dollars(10))],
        )
    }

    fn topics(records: &[OutboxRecord]) -> Vec<&str> {
        records.iter().map(|r| r.event.topic.as_str()).collect()
    }

    async fn last_request<T: SagaMessage>(store: &InMemoryOrderStore, order_id: OrderId) -> T {
        let record = store
            .outbox_for(order_id)
            .await
            .into_iter()
            .rev()
            .find(|r| r.event.topic == T::TOPIC)
            .expect("request in outbox");
        serde_json::from_value(record.event.payload).unwrap()
    }

    async fn paid(saga: &OrderSaga<InMemoryOrderStore>, store: &InMemoryOrderStore) -> Order {
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(store, order.id()).await;
        saga.on_payment_result(&PaymentResult::charged(&request, "txn-1"))
            .await
            .unwrap();
        saga.get_order(order.id()).await.unwrap()
    }

    async fn reserved(saga: &OrderSaga<InMemoryOrderStore>, store: &InMemoryOrderStore) -> Order {
        let order = paid(saga, store).await;
        let request: InventoryReserveRequest = last_request(store, order.id()).await;
        saga.on_inventory_result(&reserve_result(&request, StepStatus::Success))
            .await
            .unwrap();
        saga.get_order(order.id()).await.unwrap()
    }

    fn reserve_result(request: &InventoryReserveRequest, status: StepStatus) -> InventoryReserveResult {
        InventoryReserveResult {
            order_id: request.order_id,
            user_id: request.user_id,
            status,
            items: Vec::new(),
            failure_reason: (status == StepStatus::Failed)
                .then(|| "Insufficient inventory for product: P1".to_string()),
            correlation_id: request.correlation_id.clone(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_checkout_starts_saga() {
        let (saga, store) = saga();

        let order = saga.checkout(cart()).await.unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_price(), Money::from_dollars(20));
        let outbox = store.outbox_for(order.id()).await;
        assert_eq!(topics(&outbox), vec![order_fulfillment::PAYMENT_REQUEST]);

        let request: PaymentRequest = last_request(&store, order.id()).await;
        assert_eq!(request.amount, Money::from_dollars(20));
        assert_eq!(request.correlation_id, order.id().correlation_id());
    }

    #[tokio::test]
    async fn test_checkout_rejects_empty_cart() {
        let (saga, store) = saga();

        let err = saga
            .checkout(Checkout::new(UserId::new(1), Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::Order(OrderError::EmptyCart)));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_checkout_with_same_idempotency_key_returns_existing_order() {
        let (saga, store) = saga();

        let first = saga
            .checkout(cart().with_idempotency_key("cart-42"))
            .await
            .unwrap();
        let second = saga
            .checkout(cart().with_idempotency_key("cart-42"))
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.outbox_for(first.id()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_payment_success_requests_reservation() {
        let (saga, store) = saga();

        let order = paid(&saga, &store).await;

        assert_eq!(order.status(), OrderStatus::PaymentCompleted);
        assert_eq!(order.transaction_ref(), Some("txn-1"));
        assert!(order.has_handled(SagaStep::Payment));
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_payment_declined_fails_without_compensation() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;

        let handled = saga
            .on_payment_result(&PaymentResult::declined(&request, "Card declined"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Applied(OrderStatus::Failed));
        let order = saga.get_order(order.id()).await.unwrap();
        assert_eq!(order.failure_reason(), Some("Card declined"));
        assert_eq!(
            topics(&store.outbox_for(order.id()).await),
            vec![order_fulfillment::PAYMENT_REQUEST]
        );
    }

    #[tokio::test]
    async fn test_duplicate_payment_result_is_dropped() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;
        let result = PaymentResult::charged(&request, "txn-1");

        saga.on_payment_result(&result).await.unwrap();
        let handled = saga.on_payment_result(&result).await.unwrap();

        assert_eq!(handled, Handled::Duplicate);
        assert_eq!(store.outbox_for(order.id()).await.len(), 2);
    }

    #[tokio::test]
    async fn test_inventory_failure_refunds_full_amount() {
        let (saga, store) = saga();
        let order = paid(&saga, &store).await;
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;

        let handled = saga
            .on_inventory_result(&reserve_result(&request, StepStatus::Failed))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Applied(OrderStatus::OutOfStock));
        let refund: RefundRequest = last_request(&store, order.id()).await;
        assert_eq!(refund.amount, Money::from_dollars(20));
        assert_eq!(refund.reason, CompensationReason::InventoryFailed);
        assert_eq!(refund.transaction_ref, "txn-1");
        assert!(
            !topics(&store.outbox_for(order.id()).await)
                .contains(&order_fulfillment::INVENTORY_RESTORE_REQUEST)
        );
    }

    #[tokio::test]
    async fn test_reservation_consumes_delivery_parameters() {
        let (saga, store) = saga();
        let delivery = DeliveryParameters {
            address: Some("1 Main St".to_string()),
            ..Default::default()
        };
        let order = saga
            .checkout(cart().with_delivery(delivery))
            .await
            .unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;
        saga.on_payment_result(&PaymentResult::charged(&request, "txn-1"))
            .await
            .unwrap();
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;
        saga.on_inventory_result(&reserve_result(&request, StepStatus::Success))
            .await
            .unwrap();

        let shipping: ShippingRequest = last_request(&store, order.id()).await;
        assert_eq!(shipping.address.address, "1 Main St");
        assert_eq!(shipping.address.city, "City");
        assert_eq!(shipping.address.phone, "0000000000");
        assert!(saga.get_order(order.id()).await.unwrap().delivery().is_none());
    }

    #[tokio::test]
    async fn test_shipping_success_confirms_and_notifies() {
        let (saga, store) = saga();
        let order = reserved(&saga, &store).await;
        let request: ShippingRequest = last_request(&store, order.id()).await;

        let handled = saga
            .on_shipping_result(&ShippingResult::shipped(&request, "SHP-1", "TRACK-1"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Applied(OrderStatus::Confirmed));
        let notification: Notification = last_request(&store, order.id()).await;
        assert!(notification.message.contains("TRACK-1"));
        assert_eq!(notification.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_shipping_failure_restores_and_refunds() {
        let (saga, store) = saga();
        let order = reserved(&saga, &store).await;
        let request: ShippingRequest = last_request(&store, order.id()).await;
        let result = ShippingResult::failed(&request, "Carrier unavailable");

        saga.on_shipping_result(&result).await.unwrap();
        assert_eq!(saga.on_shipping_result(&result).await.unwrap(), Handled::Duplicate);

        let order = saga.get_order(order.id()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Failed);
        assert!(order.refund_requested());
        let outbox = topics(&store.outbox_for(order.id()).await)
            .into_iter()
            .filter(|t| {
                *t == order_fulfillment::INVENTORY_RESTORE_REQUEST
                    || *t == order_fulfillment::REFUND_REQUEST
            })
            .count();
        assert_eq!(outbox, 2);
    }

    #[tokio::test]
    async fn test_refund_failure_needs_operator() {
        let (saga, store) = saga();
        let order = paid(&saga, &store).await;
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;
        saga.on_inventory_result(&reserve_result(&request, StepStatus::Failed))
            .await
            .unwrap();
        let refund: RefundRequest = last_request(&store, order.id()).await;

        let handled = saga
            .on_refund_result(&PaymentResult::refund_failed(&refund, "Card expired"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Applied(OrderStatus::RefundFailed));
        let notification: Notification = last_request(&store, order.id()).await;
        assert_eq!(notification.priority, crate::events::Priority::High);
        assert!(notification.message.contains("Card expired"));
    }

    #[tokio::test]
    async fn test_refund_result_without_requested_refund_is_ignored() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;
        saga.on_payment_result(&PaymentResult::declined(&request, "Card declined"))
            .await
            .unwrap();
        let stray = RefundRequest::for_order(
            &saga.get_order(order.id()).await.unwrap(),
            CompensationReason::UserCancelled,
        );

        let handled = saga
            .on_refund_result(&PaymentResult::refunded(&stray))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Ignored);
        assert_eq!(
            saga.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_result_for_unknown_order_is_ignored() {
        let (saga, _store) = saga();
        let order = Order::new(
            UserId::new(1),
            vec![OrderItem::new("P1", 1, Money::from_dollars(1))],
        )
        .unwrap();
        let request = PaymentRequest::for_order(&order);

        let handled = saga
            .on_payment_result(&PaymentResult::charged(&request, "txn-1"))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Ignored);
    }

    #[tokio::test]
    async fn test_cancel_from_inventory_reserved_compensates_both_steps() {
        let (saga, store) = saga();
        let order = reserved(&saga, &store).await;
        let before = store.outbox_for(order.id()).await.len();

        let cancelled = saga
            .cancel(order.id(), UserId::new(1), Some("changed my mind"))
            .await
            .unwrap();

        assert_eq!(cancelled.status(), OrderStatus::Cancelled);
        let outbox = store.outbox_for(order.id()).await;
        assert_eq!(
            topics(&outbox[before..]),
            vec![
                order_fulfillment::INVENTORY_RESTORE_REQUEST,
                order_fulfillment::REFUND_REQUEST,
                order_fulfillment::NOTIFICATION_REQUEST,
            ]
        );
        let notification: Notification = last_request(&store, order.id()).await;
        assert!(notification.message.contains("changed my mind"));
        assert!(notification.message.contains("5-7 business days"));
    }

    #[tokio::test]
    async fn test_cancel_from_payment_completed_refunds_only() {
        let (saga, store) = saga();
        let order = paid(&saga, &store).await;
        let before = store.outbox_for(order.id()).await.len();

        saga.cancel(order.id(), UserId::new(1), None).await.unwrap();

        let outbox = store.outbox_for(order.id()).await;
        assert_eq!(
            topics(&outbox[before..]),
            vec![
                order_fulfillment::REFUND_REQUEST,
                order_fulfillment::NOTIFICATION_REQUEST,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_from_pending_needs_no_compensation() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();

        let cancelled = saga.cancel(order.id(), UserId::new(1), None).await.unwrap();

        assert_eq!(cancelled.failure_reason(), Some(DEFAULT_CANCEL_REASON));
        assert_eq!(
            topics(&store.outbox_for(order.id()).await),
            vec![
                order_fulfillment::PAYMENT_REQUEST,
                order_fulfillment::NOTIFICATION_REQUEST,
            ]
        );
        let notification: Notification = last_request(&store, order.id()).await;
        assert!(!notification.message.contains("Refund"));
    }

    #[tokio::test]
    async fn test_cancel_rejections_change_nothing() {
        let (saga, store) = saga();
        let order = reserved(&saga, &store).await;
        let outbox_len = store.outbox_for(order.id()).await.len();

        let err = saga
            .cancel(order.id(), UserId::new(2), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::Order(OrderError::NotOwner { .. })));

        let err = saga
            .cancel(OrderId::new(), UserId::new(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SagaError::OrderNotFound(_)));

        let request: ShippingRequest = last_request(&store, order.id()).await;
        saga.on_shipping_result(&ShippingResult::shipped(&request, "SHP-1", "TRACK-1"))
            .await
            .unwrap();
        let outbox_len = outbox_len + 1;

        let err = saga
            .cancel(order.id(), UserId::new(1), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SagaError::Order(OrderError::NotCancellable {
                status: OrderStatus::Confirmed
            })
        ));
        assert_eq!(store.outbox_for(order.id()).await.len(), outbox_len);
        assert_eq!(
            saga.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_cancel_twice_is_rejected() {
        let (saga, _store) = saga();
        let order = saga.checkout(cart()).await.unwrap();

        saga.cancel(order.id(), UserId::new(1), None).await.unwrap();
        let err = saga
            .cancel(order.id(), UserId::new(1), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SagaError::Order(OrderError::NotCancellable {
                status: OrderStatus::Cancelled
            })
        ));
    }

    #[tokio::test]
    async fn test_payment_after_cancellation_is_refunded_once() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;
        saga.cancel(order.id(), UserId::new(1), None).await.unwrap();

        let result = PaymentResult::charged(&request, "txn-9");
        let handled = saga.on_payment_result(&result).await.unwrap();
        assert_eq!(handled, Handled::Applied(OrderStatus::Cancelled));
        assert_eq!(saga.on_payment_result(&result).await.unwrap(), Handled::Duplicate);

        let refunds = store
            .outbox_for(order.id())
            .await
            .into_iter()
            .filter(|r| r.event.topic == order_fulfillment::REFUND_REQUEST)
            .count();
        assert_eq!(refunds, 1);
        let refund: RefundRequest = last_request(&store, order.id()).await;
        assert_eq!(refund.transaction_ref, "txn-9");
        assert_eq!(refund.reason, CompensationReason::UserCancelled);
    }

    #[tokio::test]
    async fn test_reservation_after_cancellation_is_restored() {
        let (saga, store) = saga();
        let order = paid(&saga, &store).await;
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;
        saga.cancel(order.id(), UserId::new(1), None).await.unwrap();

        saga.on_inventory_result(&reserve_result(&request, StepStatus::Success))
            .await
            .unwrap();

        let restore: InventoryRestoreRequest = last_request(&store, order.id()).await;
        assert_eq!(restore.reason, CompensationReason::UserCancelled);
        assert_eq!(
            saga.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reservation_after_cancellation_and_refund_is_restored() {
        let (saga, store) = saga();
        let order = paid(&saga, &store).await;
        let request: InventoryReserveRequest = last_request(&store, order.id()).await;
        saga.cancel(order.id(), UserId::new(1), None).await.unwrap();

        let refund: RefundRequest = last_request(&store, order.id()).await;
        let handled = saga
            .on_refund_result(&PaymentResult::refunded(&refund))
            .await
            .unwrap();
        assert_eq!(handled, Handled::Applied(OrderStatus::Refunded));

        let result = reserve_result(&request, StepStatus::Success);
        let handled = saga.on_inventory_result(&result).await.unwrap();
        assert_eq!(handled, Handled::Applied(OrderStatus::Refunded));
        assert_eq!(saga.on_inventory_result(&result).await.unwrap(), Handled::Duplicate);

        let restores: Vec<_> = store
            .outbox_for(order.id())
            .await
            .into_iter()
            .filter(|r| r.event.topic == order_fulfillment::INVENTORY_RESTORE_REQUEST)
            .collect();
        assert_eq!(restores.len(), 1);
        let restore: InventoryRestoreRequest = last_request(&store, order.id()).await;
        assert_eq!(restore.reason, CompensationReason::UserCancelled);
        assert_eq!(restore.items.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_result_is_ignored() {
        let (saga, store) = saga();
        let order = saga.checkout(cart()).await.unwrap();
        let request = InventoryReserveRequest::for_order(&order);

        let handled = saga
            .on_inventory_result(&reserve_result(&request, StepStatus::Success))
            .await
            .unwrap();

        assert_eq!(handled, Handled::Ignored);
        let order = saga.get_order(order.id()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(!order.has_handled(SagaStep::InventoryReservation));
        assert_eq!(store.outbox_for(order.id()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_results_for_one_order_apply_once() {
        let (saga, store) = saga();
        let saga = Arc::new(saga);
        let order = saga.checkout(cart()).await.unwrap();
        let request: PaymentRequest = last_request(&store, order.id()).await;
        let result = PaymentResult::charged(&request, "txn-1");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let saga = Arc::clone(&saga);
                let result = result.clone();
                tokio::spawn(async move { saga.on_payment_result(&result).await.unwrap() })
            })
            .collect();

        let mut applied = 0;
        for task in tasks {
            if let Handled::Applied(_) = task.await.unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        let reservations = store
            .outbox_for(order.id())
            .await
            .into_iter()
            .filter(|r| r.event.topic == order_fulfillment::INVENTORY_RESERVE_REQUEST)
            .count();
        assert_eq!(reservations, 1);
    }
}
