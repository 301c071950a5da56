//! Order status state machine.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// The status of an order in its fulfillment saga.
///
/// State transitions:
/// ```text
/// Created ──► Pending ──► PaymentCompleted ──► InventoryReserved ──► Confirmed
///                │               │                     │
///                ▼               ▼                     ▼
///              Failed       OutOfStock               Failed
///
/// OutOfStock | Failed | Cancelled ──► Refunded | RefundFailed   (refund result)
/// Created | Pending | PaymentCompleted | InventoryReserved
///     | OutOfStock | RefundFailed ──► Cancelled                  (user cancel)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order persisted, saga not started yet.
    #[default]
    Created,

    /// Payment requested, awaiting the payment result.
    Pending,

    /// Payment succeeded, inventory reservation requested.
    PaymentCompleted,

    /// Stock reserved, shipping requested.
    InventoryReserved,

    /// Shipment created (terminal).
    Confirmed,

    /// Payment declined or shipping failed (terminal for forward progress).
    Failed,

    /// Reservation failed, refund requested (terminal for forward progress).
    OutOfStock,

    /// Cancelled by the owner (terminal for forward progress).
    Cancelled,

    /// Compensating refund completed (terminal).
    Refunded,

    /// Compensating refund failed; needs an operator.
    RefundFailed,
}

impl OrderStatus {
    /// All statuses, in declaration order.
    pub const ALL: [OrderStatus; 10] = [
        OrderStatus::Created,
        OrderStatus::Pending,
        OrderStatus::PaymentCompleted,
        OrderStatus::InventoryReserved,
        OrderStatus::Confirmed,
        OrderStatus::Failed,
        OrderStatus::OutOfStock,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
        OrderStatus::RefundFailed,
    ];

    /// Returns true if `next` is an edge of the saga state machine from `self`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Created, Pending) => true,
            (Pending, PaymentCompleted | Failed) => true,
            (PaymentCompleted, InventoryReserved | OutOfStock) => true,
            (InventoryReserved, Confirmed | Failed) => true,
            (OutOfStock | Failed | Cancelled, Refunded | RefundFailed) => true,
            (_, Cancelled) => self.can_cancel(),
            _ => false,
        }
    }

    /// Returns true if the owner may still cancel the order.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Created
                | OrderStatus::Pending
                | OrderStatus::PaymentCompleted
                | OrderStatus::InventoryReserved
                | OrderStatus::OutOfStock
                | OrderStatus::RefundFailed
        )
    }

    /// Returns true if the saga makes no further forward progress from here.
    ///
    /// This is terminal for forward progress only. `OUT_OF_STOCK`, `FAILED`
    /// and `CANCELLED` still move to `REFUNDED` or `REFUND_FAILED` when a
    /// pending refund result arrives, so they are not end states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed
                | OrderStatus::Failed
                | OrderStatus::OutOfStock
                | OrderStatus::Cancelled
                | OrderStatus::Refunded
        )
    }

    /// Returns the status name as stored and published.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Pending => "PENDING",
            OrderStatus::PaymentCompleted => "PAYMENT_COMPLETED",
            OrderStatus::InventoryReserved => "INVENTORY_RESERVED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::OutOfStock => "OUT_OF_STOCK",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::RefundFailed => "REFUND_FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}
