//! Order fulfillment saga topics and consumer groups.
//!
//! Every message is keyed by the order id, so all messages of one saga run
//! land on the same partition of their topic.

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Orchestrator → payment: charge the order amount.
pub const PAYMENT_REQUEST: &str = "order.payment.request";

/// Payment → orchestrator: charge and refund results.
pub const PAYMENT_RESPONSE: &str = "payment.order.response";

/// Orchestrator → payment: refund a compensated order.
pub const REFUND_REQUEST: &str = "payment.refund.request";

/// Orchestrator → inventory: reserve the order's items.
pub const INVENTORY_RESERVE_REQUEST: &str = "order.inventory.reserve.request";

/// Inventory → orchestrator: reservation result.
pub const INVENTORY_RESERVE_RESPONSE: &str = "inventory.order.reserve.response";

/// Orchestrator → inventory: give back reserved stock.
pub const INVENTORY_RESTORE_REQUEST: &str = "order.inventory.restore.request";

/// Orchestrator → shipping: ship the order.
pub const SHIPPING_REQUEST: &str = "order.shipping.request";

/// Shipping → orchestrator: shipment result.
pub const SHIPPING_RESPONSE: &str = "shipping.order.response";

/// Orchestrator → notification: fire-and-forget customer or operator message.
pub const NOTIFICATION_REQUEST: &str = "order.notification.request";

/// Consumer group of the orchestrator.
pub const ORDER_GROUP: &str = "order-saga";

/// Consumer group of the inventory service.
pub const INVENTORY_GROUP: &str = "inventory-service";

/// Consumer group of the payment service.
pub const PAYMENT_GROUP: &str = "payment-service";

/// Consumer group of the shipping service.
pub const SHIPPING_GROUP: &str = "shipping-service";

/// Consumer group of the notification service.
pub const NOTIFICATION_GROUP: &str = "notification-service";
