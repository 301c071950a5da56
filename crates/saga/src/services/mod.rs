//! Collaborators of the orchestrator, connected through the event bus.
//!
//! The inventory service is backed by the reservation handler. Payment,
//! shipping and notifications are in-process simulators used for local runs
//! and end-to-end tests.

pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use inventory::InventoryService;
pub use notification::NotificationSink;
pub use payment::PaymentSimulator;
pub use shipping::ShippingSimulator;
