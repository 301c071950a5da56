//! Order fulfillment saga.
//!
//! The orchestrator drives each order through payment, inventory
//! reservation and shipping by exchanging messages with the collaborators
//! over the event bus. Failures are compensated with refunds and stock
//! restores instead of rollbacks.
//!
//! ```text
//! checkout ─► PaymentRequest ─► InventoryReserveRequest ─► ShippingRequest ─► Notification
//!                  │                     │                       │
//!                  ▼                     ▼                       ▼
//!               FAILED         RefundRequest (OUT_OF_STOCK)   RestoreRequest + RefundRequest
//! ```
//!
//! Order state changes and the messages they produce are committed together
//! through the store's outbox and published by the [`OutboxRelay`].

pub mod config;
pub mod consumers;
pub mod error;
pub mod events;
pub mod locks;
pub mod orchestrator;
pub mod order_fulfillment;
pub mod relay;
pub mod runtime;
pub mod services;

pub use config::SagaConfig;
pub use consumers::SagaResultHandler;
pub use error::{Result, SagaError};
pub use events::{
    CompensationReason, InventoryReserveRequest, InventoryReserveResult, InventoryRestoreRequest,
    Notification, NotificationType, PaymentRequest, PaymentResult, PaymentStatus, Priority,
    RefundRequest, SagaMessage, ShippingRequest, ShippingResult, StepStatus,
};
pub use locks::OrderLocks;
pub use orchestrator::{Checkout, Handled, OrderSaga};
pub use relay::OutboxRelay;
pub use runtime::SagaRuntime;
pub use services::{InventoryService, NotificationSink, PaymentSimulator, ShippingSimulator};
