//! Domain error types.

use common::OrderId;
use thiserror::Error;

use crate::order::{OrderError, Version};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A business rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The stored order changed since it was read.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// Another order already uses this idempotency key.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
