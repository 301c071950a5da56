//! Domain layer for the order fulfillment saga.
//!
//! This crate provides:
//! - The `Order` aggregate with its status state machine
//! - Value objects for line items, delivery parameters and saga steps
//! - The `OrderStore` trait with a transactional outbox
//! - In-memory and PostgreSQL store implementations

pub mod error;
pub mod memory;
pub mod order;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{DomainError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{
    DeliveryParameters, MAX_LINE_QUANTITY, Order, OrderError, OrderItem, OrderStatus, SagaStep,
    ShippingAddress, Version,
};
pub use outbox::{OutboundEvent, OutboxRecord};
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
