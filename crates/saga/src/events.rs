//! Message contracts exchanged between the orchestrator and its
//! collaborators.
//!
//! Every message carries the order id, the owning user, a correlation id equal
//! to the order id, and the time it was produced. Messages are keyed by the
//! order id on the bus.

use chrono::{DateTime, Utc};
use common::{CorrelationId, Money, OrderId, UserId};
use domain::{Order, OrderStatus, OutboundEvent, ShippingAddress};
use event_bus::{Envelope, EventBus, EventBusExt};
use inventory::{LineOutcome, ReservationOutcome, StockLine};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::order_fulfillment;

/// A message with a fixed topic and type name.
pub trait SagaMessage: Serialize + DeserializeOwned + Send + Sync {
    /// Destination topic.
    const TOPIC: &'static str;

    /// Type name carried in the envelope.
    const EVENT_TYPE: &'static str;

    /// The order this message belongs to. Used as the partition key.
    fn order_id(&self) -> OrderId;

    /// Serializes the message into an outbox entry.
    fn to_outbound(&self) -> Result<OutboundEvent, serde_json::Error> {
        OutboundEvent::new(
            Self::TOPIC,
            self.order_id().to_string(),
            Self::EVENT_TYPE,
            self,
        )
    }
}

/// Publishes a message directly, bypassing the outbox.
pub(crate) async fn publish<M, B>(bus: &B, message: &M) -> event_bus::Result<()>
where
    M: SagaMessage,
    B: EventBus + ?Sized,
{
    bus.publish_event(
        M::TOPIC,
        &message.order_id().to_string(),
        M::EVENT_TYPE,
        message,
    )
    .await?;
    Ok(())
}

/// Decodes a delivered message.
///
/// A payload that does not decode is logged and counted, and `None` is
/// returned so the caller can acknowledge it. Redelivering it would not help.
pub(crate) fn decode<M: SagaMessage>(handler: &'static str, envelope: &Envelope) -> Option<M> {
    match envelope.decode::<M>() {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::error!(
                handler,
                topic = %envelope.topic,
                message_id = %envelope.message_id,
                event_type = %envelope.event_type,
                error = %e,
                "Malformed message skipped"
            );
            metrics::counter!("saga_malformed_messages_total", "topic" => envelope.topic.clone())
                .increment(1);
            None
        }
    }
}

macro_rules! saga_message {
    ($ty:ty, $topic:expr, $event_type:literal) => {
        impl SagaMessage for $ty {
            const TOPIC: &'static str = $topic;
            const EVENT_TYPE: &'static str = $event_type;

            fn order_id(&self) -> OrderId {
                self.order_id
            }
        }
    };
}

/// Outcome reported by a payment, inventory or shipping step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Outcome reported by the payment service, for charges and refunds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Success,
    Failed,
    Refunded,
    RefundFailed,
}

impl PaymentStatus {
    /// Returns true for refund outcomes.
    pub fn is_refund(&self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::RefundFailed)
    }
}

/// Why a compensation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationReason {
    InventoryFailed,
    ShippingFailed,
    UserCancelled,
}

impl CompensationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationReason::InventoryFailed => "INVENTORY_FAILED",
            CompensationReason::ShippingFailed => "SHIPPING_FAILED",
            CompensationReason::UserCancelled => "USER_CANCELLED",
        }
    }
}

impl std::fmt::Display for CompensationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request to charge an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            amount: order.total_price(),
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(PaymentRequest, order_fulfillment::PAYMENT_REQUEST, "PaymentRequest");

/// Result of a charge or a refund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: PaymentStatus,
    #[serde(default)]
    pub transaction_ref: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl PaymentResult {
    /// A successful charge.
    pub fn charged(request: &PaymentRequest, transaction_ref: impl Into<String>) -> Self {
        Self::for_charge(request, PaymentStatus::Success, Some(transaction_ref.into()), None)
    }

    /// A declined charge.
    pub fn declined(request: &PaymentRequest, reason: impl Into<String>) -> Self {
        Self::for_charge(request, PaymentStatus::Failed, None, Some(reason.into()))
    }

    /// A completed refund.
    pub fn refunded(request: &RefundRequest) -> Self {
        Self::for_refund(request, PaymentStatus::Refunded, None)
    }

    /// A refund that could not be completed.
    pub fn refund_failed(request: &RefundRequest, reason: impl Into<String>) -> Self {
        Self::for_refund(request, PaymentStatus::RefundFailed, Some(reason.into()))
    }

    fn for_charge(
        request: &PaymentRequest,
        status: PaymentStatus,
        transaction_ref: Option<String>,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status,
            transaction_ref,
            failure_reason,
            correlation_id: request.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }

    fn for_refund(
        request: &RefundRequest,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status,
            transaction_ref: Some(request.transaction_ref.clone()),
            failure_reason,
            correlation_id: request.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(PaymentResult, order_fulfillment::PAYMENT_RESPONSE, "PaymentResult");

/// Request to reserve the items of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserveRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<StockLine>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl InventoryReserveRequest {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            items: stock_lines(order),
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(
    InventoryReserveRequest,
    order_fulfillment::INVENTORY_RESERVE_REQUEST,
    "InventoryReserveRequest"
);

/// Result of a reservation, with one entry per requested line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserveResult {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: StepStatus,
    pub items: Vec<LineOutcome>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl InventoryReserveResult {
    /// Builds the response for a processed (or replayed) reservation.
    pub fn from_outcome(request: &InventoryReserveRequest, outcome: ReservationOutcome) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status: if outcome.is_reserved() {
                StepStatus::Success
            } else {
                StepStatus::Failed
            },
            items: outcome.items,
            failure_reason: outcome.failure_reason,
            correlation_id: outcome.correlation_id,
            timestamp: Utc::now(),
        }
    }
}

saga_message!(
    InventoryReserveResult,
    order_fulfillment::INVENTORY_RESERVE_RESPONSE,
    "InventoryReserveResult"
);

/// Request to give back the stock reserved for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRestoreRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub items: Vec<StockLine>,
    pub reason: CompensationReason,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl InventoryRestoreRequest {
    pub fn for_order(order: &Order, reason: CompensationReason) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            items: stock_lines(order),
            reason,
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(
    InventoryRestoreRequest,
    order_fulfillment::INVENTORY_RESTORE_REQUEST,
    "InventoryRestoreRequest"
);

/// Request to ship an order to a resolved address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub address: ShippingAddress,
    pub amount: Money,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl ShippingRequest {
    pub fn for_order(order: &Order, address: ShippingAddress) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            address,
            amount: order.total_price(),
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(ShippingRequest, order_fulfillment::SHIPPING_REQUEST, "ShippingRequest");

/// Result of a shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingResult {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: StepStatus,
    #[serde(default)]
    pub shipment_id: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl ShippingResult {
    /// A created shipment.
    pub fn shipped(
        request: &ShippingRequest,
        shipment_id: impl Into<String>,
        tracking_number: impl Into<String>,
    ) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status: StepStatus::Success,
            shipment_id: Some(shipment_id.into()),
            tracking_number: Some(tracking_number.into()),
            failure_reason: None,
            correlation_id: request.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }

    /// A shipment that could not be created.
    pub fn failed(request: &ShippingRequest, reason: impl Into<String>) -> Self {
        Self {
            order_id: request.order_id,
            user_id: request.user_id,
            status: StepStatus::Failed,
            shipment_id: None,
            tracking_number: None,
            failure_reason: Some(reason.into()),
            correlation_id: request.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(ShippingResult, order_fulfillment::SHIPPING_RESPONSE, "ShippingResult");

/// Request to refund the full amount of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub transaction_ref: String,
    pub amount: Money,
    pub reason: CompensationReason,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl RefundRequest {
    /// Builds a refund for the order's total.
    ///
    /// The transaction reference falls back to `txn-<order-id>` when the
    /// payment result did not carry one.
    pub fn for_order(order: &Order, reason: CompensationReason) -> Self {
        let transaction_ref = order
            .transaction_ref()
            .map(str::to_string)
            .unwrap_or_else(|| fallback_transaction_ref(order.id()));

        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            transaction_ref,
            amount: order.total_price(),
            reason,
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(RefundRequest, order_fulfillment::REFUND_REQUEST, "RefundRequest");

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    OrderConfirmed,
    OrderCancelled,
    RefundFailed,
}

/// Delivery priority of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Fire-and-forget message to the customer or to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub order_id: OrderId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status: OrderStatus,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub amount: Money,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// The order was shipped.
    pub fn confirmed(order: &Order) -> Self {
        let tracking = order.tracking_number().unwrap_or("unavailable");
        Self::for_order(
            order,
            NotificationType::OrderConfirmed,
            format!("Your order has been confirmed and shipped. Tracking: {tracking}"),
            Priority::Normal,
        )
    }

    /// The order was cancelled by its owner.
    pub fn cancelled(order: &Order, reason: Option<&str>, refund_pending: bool) -> Self {
        let mut message = String::from("Your order has been cancelled.");
        if let Some(reason) = reason.filter(|r| !r.is_empty()) {
            message.push_str(&format!(" Reason: {reason}."));
        }
        if refund_pending {
            message.push_str(" Refund will be processed within 5-7 business days.");
        }

        Self::for_order(
            order,
            NotificationType::OrderCancelled,
            message,
            Priority::Normal,
        )
    }

    /// A refund failed and an operator has to step in.
    pub fn refund_failed(order: &Order, reason: &str) -> Self {
        Self::for_order(
            order,
            NotificationType::RefundFailed,
            format!(
                "URGENT: Payment refund failed for order {}. Reason: {reason}. Manual intervention required.",
                order.id()
            ),
            Priority::High,
        )
    }

    fn for_order(
        order: &Order,
        notification_type: NotificationType,
        message: String,
        priority: Priority,
    ) -> Self {
        Self {
            order_id: order.id(),
            user_id: order.user_id(),
            notification_type,
            status: order.status(),
            message,
            priority,
            amount: order.total_price(),
            correlation_id: order.id().correlation_id(),
            timestamp: Utc::now(),
        }
    }
}

saga_message!(Notification, order_fulfillment::NOTIFICATION_REQUEST, "Notification");

/// Transaction reference used when the payment service did not report one.
pub fn fallback_transaction_ref(order_id: OrderId) -> String {
    format!("txn-{order_id}")
}

fn stock_lines(order: &Order) -> Vec<StockLine> {
    order
        .items()
        .iter()
        .map(|item| StockLine::new(item.product_id.clone(), item.quantity))
        .collect()
}
