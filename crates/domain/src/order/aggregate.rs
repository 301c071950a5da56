//! Order aggregate implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use super::{
    DeliveryParameters, OrderError, OrderItem, OrderStatus, SagaStep, ShippingAddress, Version,
};

/// Largest quantity accepted on one order line.
///
/// Stock quantities are stored as `INTEGER`, so a line must fit in an `i32`.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// Order aggregate root.
///
/// Holds the line items snapshot taken at checkout and the saga status. The
/// status only moves along the edges of [`OrderStatus::can_transition_to`].
/// Orders are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) user_id: UserId,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) total_price: Money,
    pub(crate) status: OrderStatus,
    pub(crate) idempotency_key: Option<String>,
    pub(crate) checkout_batch_id: Option<String>,

    /// Delivery parameters, consumed when the shipping request is built.
    pub(crate) delivery: Option<DeliveryParameters>,

    pub(crate) transaction_ref: Option<String>,
    pub(crate) shipment_id: Option<String>,
    pub(crate) tracking_number: Option<String>,
    pub(crate) failure_reason: Option<String>,

    /// Whether a compensating refund was requested for this order.
    pub(crate) refund_requested: bool,

    /// Whether the owner cancelled the order. Stays set after the refund
    /// result moves the order on from `CANCELLED`.
    #[serde(default)]
    pub(crate) cancelled: bool,

    /// Saga steps whose result was already applied.
    pub(crate) handled_steps: BTreeSet<SagaStep>,

    pub(crate) version: Version,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order in `CREATED` from a cart.
    ///
    /// The total price is computed here once and never recomputed.
    pub fn new(user_id: UserId, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        for item in &items {
            if item.quantity == 0 || item.quantity > MAX_LINE_QUANTITY {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.to_string(),
                    price: item.unit_price.cents(),
                });
            }
        }

        let total_price = items
            .iter()
            .try_fold(Money::zero(), |total, item| {
                item.subtotal()
                    .and_then(|subtotal| total.checked_add(subtotal))
            })
            .ok_or(OrderError::TotalOverflow)?;
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            total_price,
            status: OrderStatus::Created,
            idempotency_key: None,
            checkout_batch_id: None,
            delivery: None,
            transaction_ref: None,
            shipment_id: None,
            tracking_number: None,
            failure_reason: None,
            refund_requested: false,
            cancelled: false,
            handled_steps: BTreeSet::new(),
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Sets the client-supplied idempotency key.
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key.filter(|k| !k.is_empty());
        self
    }

    /// Sets the checkout batch correlation id.
    pub fn with_checkout_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.checkout_batch_id = batch_id;
        self
    }

    /// Sets the delivery parameters.
    pub fn with_delivery(mut self, delivery: Option<DeliveryParameters>) -> Self {
        self.delivery = delivery;
        self
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn checkout_batch_id(&self) -> Option<&str> {
        self.checkout_batch_id.as_deref()
    }

    pub fn delivery(&self) -> Option<&DeliveryParameters> {
        self.delivery.as_ref()
    }

    /// Transaction reference of the successful charge, if any.
    pub fn transaction_ref(&self) -> Option<&str> {
        self.transaction_ref.as_deref()
    }

    pub fn shipment_id(&self) -> Option<&str> {
        self.shipment_id.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn refund_requested(&self) -> bool {
        self.refund_requested
    }

    /// Returns true if the order was cancelled at some point, even if a
    /// refund result has since moved it to `REFUNDED` or `REFUND_FAILED`.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns true if the result of `step` was already applied.
    pub fn has_handled(&self, step: SagaStep) -> bool {
        self.handled_steps.contains(&step)
    }

    pub fn handled_steps(&self) -> impl Iterator<Item = SagaStep> + '_ {
        self.handled_steps.iter().copied()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if `user_id` owns this order.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

// Saga mutations
impl Order {
    /// Moves the order to `next`, rejecting edges outside the state machine.
    pub fn transition(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == OrderStatus::Cancelled {
            self.cancelled = true;
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Records that the result of `step` was applied.
    ///
    /// Returns false if it was already recorded.
    pub fn record_step(&mut self, step: SagaStep) -> bool {
        let inserted = self.handled_steps.insert(step);
        if inserted {
            self.touch();
        }
        inserted
    }

    /// Takes the delivery parameters off the order, substituting defaults for
    /// missing fields. A second call yields only defaults.
    pub fn take_delivery(&mut self) -> ShippingAddress {
        self.touch();
        self.delivery.take().unwrap_or_default().resolve()
    }

    /// Records the transaction reference returned by the payment service.
    pub fn set_transaction_ref(&mut self, transaction_ref: impl Into<String>) {
        self.transaction_ref = Some(transaction_ref.into());
        self.touch();
    }

    /// Records the shipment created for this order.
    pub fn set_shipment(&mut self, shipment_id: Option<String>, tracking_number: Option<String>) {
        self.shipment_id = shipment_id;
        self.tracking_number = tracking_number;
        self.touch();
    }

    /// Records why the order failed or was cancelled.
    pub fn set_failure_reason(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.touch();
    }

    /// Marks that a compensating refund was requested.
    pub fn mark_refund_requested(&mut self) {
        self.refund_requested = true;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
