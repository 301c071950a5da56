//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{MAX_LINE_QUANTITY, Order};
pub use state::OrderStatus;
pub use value_objects::{
    DEFAULT_ADDRESS, DEFAULT_CITY, DEFAULT_COUNTRY, DEFAULT_PHONE, DEFAULT_STATE,
    DEFAULT_ZIP_CODE, DeliveryParameters, OrderItem, SagaStep, ShippingAddress, Version,
};

use common::UserId;
use thiserror::Error;

/// Business rule violations on an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Checkout was attempted with an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// Invalid quantity.
    #[error(
        "Invalid quantity for {product_id}: {quantity} (must be between 1 and {max})",
        max = MAX_LINE_QUANTITY
    )]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: String, price: i64 },

    /// The order total does not fit in an `i64` of cents.
    #[error("Order total is too large")]
    TotalOverflow,

    /// The requested status change is not an edge of the state machine.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order cannot be cancelled in its current status.
    #[error("Cannot cancel order in status {status}")]
    NotCancellable { status: OrderStatus },

    /// The requesting user does not own the order.
    #[error("User {user_id} does not own this order")]
    NotOwner { user_id: UserId },

    /// A stored status value is not recognized.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),
}
