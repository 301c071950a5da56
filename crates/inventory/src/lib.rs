//! Inventory side of the order fulfillment saga.
//!
//! This crate provides:
//! - `StockStore`: available quantity per product with an atomic
//!   decrement-if-sufficient operation
//! - `ReservationLedger`: one durable entry per processed correlation id
//! - `ReservationHandler`: all-or-nothing, idempotent stock reservation and
//!   at-most-once stock restore

pub mod error;
pub mod handler;
pub mod ledger;
pub mod postgres;
pub mod stock;

pub use error::{InventoryError, Result};
pub use handler::{
    LineOutcome, PREVIOUSLY_FAILED, ReservationHandler, ReservationOutcome, ReservationRequest,
    ReservationStatus, RestoreOutcome, RestoreRequest, StockLine,
};
pub use ledger::{InMemoryReservationLedger, LedgerEntry, LedgerStatus, ReservationLedger};
pub use postgres::{PostgresReservationLedger, PostgresStockStore};
pub use stock::{InMemoryStockStore, StockStore};
