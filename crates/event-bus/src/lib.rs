//! Event bus for the order fulfillment saga.
//!
//! The bus is an ordered, partitioned, at-least-once publish/subscribe
//! transport. Messages are routed to a partition by their key (the order id),
//! and each consumer group reads a partition strictly in order, so all events
//! of one order are handled by a single consumer at a time.

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod memory;

pub use bus::{EventBus, EventBusExt, partition_for};
pub use consumer::{Consumer, MessageHandler, RetryPolicy};
pub use envelope::{Delivery, Envelope, EnvelopeBuilder, MessageId};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
