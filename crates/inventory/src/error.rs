//! Inventory error types.

use common::{CorrelationId, ProductId};
use thiserror::Error;

/// Errors that can occur in the inventory stores and handler.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The stock store could not serve the request.
    #[error("Stock store unavailable: {0}")]
    StoreUnavailable(String),

    /// A quantity does not fit the stock record.
    #[error("Quantity {quantity} out of range for product {product_id}")]
    QuantityOutOfRange { product_id: ProductId, quantity: u32 },

    /// A ledger entry already exists for this correlation id.
    #[error("Ledger entry already exists for correlation id {0}")]
    DuplicateCorrelation(CorrelationId),

    /// A stored ledger status value is not recognized.
    #[error("Unknown ledger status: {0}")]
    UnknownLedgerStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
