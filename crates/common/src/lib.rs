//! Shared types for the order fulfillment saga.
//!
//! Identifiers are wrapped in newtypes so an order id can never be passed
//! where a product id or correlation id is expected.

mod money;
mod types;

pub use money::Money;
pub use types::{CorrelationId, OrderId, ProductId, UserId};
