//! Saga error types.

use common::OrderId;
use domain::{DomainError, OrderError};
use event_bus::BusError;
use inventory::InventoryError;
use thiserror::Error;

/// Errors that can occur while driving an order saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A business rule on the order was violated.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order store error.
    #[error("Order store error: {0}")]
    Domain(#[from] DomainError),

    /// Inventory error.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
