//! End-to-end tests of the order fulfillment saga over the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use common::{CorrelationId, Money, OrderId, ProductId, UserId};
use domain::{DeliveryParameters, InMemoryOrderStore, OrderItem, OrderStatus, OrderStore};
use event_bus::{EventBus, EventBusExt, InMemoryEventBus};
use inventory::{
    InMemoryReservationLedger, InMemoryStockStore, LedgerStatus, ReservationHandler,
    ReservationLedger, StockStore,
};
use saga::order_fulfillment;
use saga::{
    Checkout, CompensationReason, InventoryReserveRequest, InventoryReserveResult,
    InventoryService, NotificationSink, NotificationType, OrderSaga, PaymentResult,
    PaymentSimulator, Priority, RefundRequest, SagaConfig, SagaMessage, SagaRuntime,
    ShippingRequest, ShippingSimulator, StepStatus,
};
use tokio::sync::watch;

type Runtime = SagaRuntime<InMemoryOrderStore, InMemoryEventBus>;

struct TestHarness {
    runtime: Runtime,
    store: Arc<InMemoryOrderStore>,
    bus: Arc<InMemoryEventBus>,
    stock: InMemoryStockStore,
    ledger: InMemoryReservationLedger,
    payments: PaymentSimulator<InMemoryEventBus>,
    shipping: ShippingSimulator<InMemoryEventBus>,
    notifications: NotificationSink,
}

impl TestHarness {
    fn new(stock: &[(&str, u32)]) -> Self {
        Self::build(stock, true)
    }

    /// Leaves shipping requests unconsumed so orders stop at INVENTORY_RESERVED.
    fn without_shipping(stock: &[(&str, u32)]) -> Self {
        Self::build(stock, false)
    }

    fn build(stock: &[(&str, u32)], serve_shipping: bool) -> Self {
        let store = Arc::new(InMemoryOrderStore::new());
        let bus = Arc::new(InMemoryEventBus::with_partitions(4));
        let stock = InMemoryStockStore::with_stock(stock.iter().map(|(p, q)| (*p, *q)));
        let ledger = InMemoryReservationLedger::new();
        let payments = PaymentSimulator::new(Arc::clone(&bus));
        let shipping = ShippingSimulator::new(Arc::clone(&bus));
        let notifications = NotificationSink::new();

        let config = SagaConfig {
            redelivery_backoff: Duration::from_millis(1),
            outbox_poll_interval: Duration::from_millis(5),
            ..SagaConfig::default()
        };
        let saga = Arc::new(OrderSaga::new(Arc::clone(&store)));
        let handler = ReservationHandler::new(Arc::new(stock.clone()), Arc::new(ledger.clone()));
        let mut runtime = SagaRuntime::new(saga, Arc::clone(&bus), &config)
            .with_inventory(InventoryService::new(handler, Arc::clone(&bus)))
            .with_payment(payments.clone())
            .with_notifications(notifications.clone());
        if serve_shipping {
            runtime = runtime.with_shipping(shipping.clone());
        }

        Self {
            runtime,
            store,
            bus,
            stock,
            ledger,
            payments,
            shipping,
            notifications,
        }
    }

    fn saga(&self) -> &OrderSaga<InMemoryOrderStore> {
        self.runtime.saga()
    }

    async fn checkout(&self, items: &[(&str, u32, i64)]) -> OrderId {
        let items = items
            .iter()
            .map(|(p, q, dollars)| OrderItem::new(*p, *q, Money::from_dollars(*dollars)))
            .collect();
        self.saga()
            .checkout(Checkout::new(UserId::new(1), items))
            .await
            .unwrap()
            .id()
    }

    async fn settle(&self) {
        self.runtime.run_until_idle().await.unwrap();
    }

    async fn status(&self, order_id: OrderId) -> OrderStatus {
        self.saga().get_order(order_id).await.unwrap().status()
    }

    async fn available(&self, product: &str) -> u32 {
        self.stock.available(&ProductId::new(product)).await.unwrap()
    }

    async fn published<M: SagaMessage>(&self, order_id: OrderId) -> Vec<M> {
        self.bus
            .published(M::TOPIC)
            .await
            .iter()
            .map(|e| e.decode::<M>().unwrap())
            .filter(|m| m.order_id() == order_id)
            .collect()
    }
}

// Scenario A: every step succeeds.
#[tokio::test]
async fn test_happy_path_confirms_order() {
    let h = TestHarness::new(&[("P1", 5)]);

    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::Confirmed);
    assert_eq!(h.available("P1").await, 3);

    let order = h.saga().get_order(order_id).await.unwrap();
    assert_eq!(order.transaction_ref(), Some(format!("txn-{order_id}").as_str()));
    assert!(order.shipment_id().is_some());
    let tracking = order.tracking_number().unwrap().to_string();

    let notifications = h.notifications.for_order(order_id).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::OrderConfirmed);
    assert!(notifications[0].message.contains(&tracking));

    assert_eq!(h.shipping.shipment_count().await, 1);
    assert_eq!(h.payments.charge_count().await, 1);
    assert!(h.store.pending_outbox(10).await.unwrap().is_empty());
}

// Scenario B: not enough stock for the only line.
#[tokio::test]
async fn test_insufficient_stock_refunds_order() {
    let h = TestHarness::new(&[("P1", 1)]);

    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    let refunds: Vec<RefundRequest> = h.published(order_id).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, Money::from_dollars(20));
    assert_eq!(refunds[0].reason, CompensationReason::InventoryFailed);
    assert_eq!(h.available("P1").await, 1);

    // The simulator refunds the charge, which completes the compensation.
    assert_eq!(h.status(order_id).await, OrderStatus::Refunded);
    let order = h.saga().get_order(order_id).await.unwrap();
    assert_eq!(
        order.failure_reason(),
        Some("Insufficient inventory for product: P1")
    );
    // The refunded charge is no longer held.
    assert_eq!(h.payments.charge_count().await, 0);
}

// Scenario C: the second line fails and the first is rolled back.
#[tokio::test]
async fn test_partial_reservation_is_rolled_back() {
    let h = TestHarness::new(&[("P1", 5), ("P2", 0)]);

    let order_id = h.checkout(&[("P1", 1, 10), ("P2", 1, 10)]).await;
    h.settle().await;

    assert_eq!(h.available("P1").await, 5);
    assert_eq!(h.available("P2").await, 0);

    let entries = h.ledger.entries_for_order(order_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, LedgerStatus::Failed);

    let results: Vec<InventoryReserveResult> = h.published(order_id).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, StepStatus::Failed);
    assert_eq!(
        results[0].failure_reason.as_deref(),
        Some("Insufficient inventory for product: P2")
    );
    assert!(results[0].items.iter().all(|line| !line.reserved));
}

// Scenario D: the reservation request of scenario C is delivered again.
#[tokio::test]
async fn test_duplicate_reservation_request_replays_outcome() {
    let h = TestHarness::new(&[("P1", 5), ("P2", 0)]);
    let order_id = h.checkout(&[("P1", 1, 10), ("P2", 1, 10)]).await;
    h.settle().await;
    let status_before = h.status(order_id).await;

    let request: Vec<InventoryReserveRequest> = h.published(order_id).await;
    h.bus
        .publish_event(
            InventoryReserveRequest::TOPIC,
            &order_id.to_string(),
            InventoryReserveRequest::EVENT_TYPE,
            &request[0],
        )
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.available("P1").await, 5);
    assert_eq!(h.ledger.len().await, 1);

    let results: Vec<InventoryReserveResult> = h.published(order_id).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].status, StepStatus::Failed);
    assert_eq!(results[1].failure_reason, results[0].failure_reason);

    // The replayed result is a duplicate for the orchestrator.
    assert_eq!(h.status(order_id).await, status_before);
    let refunds: Vec<RefundRequest> = h.published(order_id).await;
    assert_eq!(refunds.len(), 1);
}

#[tokio::test]
async fn test_declined_payment_fails_order() {
    let h = TestHarness::new(&[("P1", 5)]);
    h.payments.set_decline_charges(true).await;

    let order_id = h.checkout(&[("P1", 1, 10)]).await;
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::Failed);
    assert_eq!(h.available("P1").await, 5);
    assert!(h.published::<InventoryReserveRequest>(order_id).await.is_empty());
    assert!(h.published::<RefundRequest>(order_id).await.is_empty());
}

#[tokio::test]
async fn test_shipping_failure_restores_stock_and_refunds() {
    let h = TestHarness::new(&[("P1", 5)]);
    h.shipping.set_fail_shipments(true).await;

    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    assert_eq!(h.available("P1").await, 5);
    assert_eq!(h.status(order_id).await, OrderStatus::Refunded);
    let refunds: Vec<RefundRequest> = h.published(order_id).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].reason, CompensationReason::ShippingFailed);

    let restore_id = CorrelationId::new(format!("{order_id}:restore"));
    let restore = h.ledger.find(&restore_id).await.unwrap().unwrap();
    assert_eq!(restore.status, LedgerStatus::Restored);
}

#[tokio::test]
async fn test_refund_failure_notifies_operators() {
    let h = TestHarness::new(&[("P1", 1)]);
    h.payments.set_fail_refunds(true).await;

    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::RefundFailed);
    let notifications = h.notifications.for_order(order_id).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::RefundFailed);
    assert_eq!(notifications[0].priority, Priority::High);
    assert!(notifications[0].message.starts_with("URGENT"));
}

#[tokio::test]
async fn test_cancel_after_reservation_compensates_everything() {
    let h = TestHarness::without_shipping(&[("P1", 5)]);
    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::InventoryReserved);
    assert_eq!(h.available("P1").await, 3);

    let cancelled = h
        .saga()
        .cancel(order_id, UserId::new(1), Some("found it cheaper"))
        .await
        .unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    h.settle().await;

    assert_eq!(h.available("P1").await, 5);
    assert_eq!(h.status(order_id).await, OrderStatus::Refunded);

    let refunds: Vec<RefundRequest> = h.published(order_id).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].reason, CompensationReason::UserCancelled);

    let notifications = h.notifications.for_order(order_id).await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::OrderCancelled);
    assert!(notifications[0].message.contains("found it cheaper"));
}

#[tokio::test]
async fn test_redelivered_requests_after_rewind_change_nothing() {
    let h = TestHarness::new(&[("P1", 5)]);
    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;
    assert_eq!(h.status(order_id).await, OrderStatus::Confirmed);

    for partition in 0..h.bus.partitions() {
        for topic in [
            order_fulfillment::PAYMENT_REQUEST,
            order_fulfillment::INVENTORY_RESERVE_REQUEST,
            order_fulfillment::SHIPPING_REQUEST,
        ] {
            let group = match topic {
                order_fulfillment::PAYMENT_REQUEST => order_fulfillment::PAYMENT_GROUP,
                order_fulfillment::INVENTORY_RESERVE_REQUEST => order_fulfillment::INVENTORY_GROUP,
                _ => order_fulfillment::SHIPPING_GROUP,
            };
            h.bus.rewind(group, topic, partition, 0).await;
        }
        for topic in [
            order_fulfillment::PAYMENT_RESPONSE,
            order_fulfillment::INVENTORY_RESERVE_RESPONSE,
            order_fulfillment::SHIPPING_RESPONSE,
        ] {
            h.bus
                .rewind(order_fulfillment::ORDER_GROUP, topic, partition, 0)
                .await;
        }
    }
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::Confirmed);
    assert_eq!(h.available("P1").await, 3);
    assert_eq!(h.shipping.shipment_count().await, 1);
    assert_eq!(h.notifications.for_order(order_id).await.len(), 1);
}

#[tokio::test]
async fn test_duplicate_results_do_not_compensate_twice() {
    let h = TestHarness::new(&[("P1", 1)]);
    let order_id = h.checkout(&[("P1", 2, 10)]).await;
    h.settle().await;

    let results: Vec<PaymentResult> = h.published(order_id).await;
    for result in &results {
        h.bus
            .publish_event(
                PaymentResult::TOPIC,
                &order_id.to_string(),
                PaymentResult::EVENT_TYPE,
                result,
            )
            .await
            .unwrap();
    }
    let inventory: Vec<InventoryReserveResult> = h.published(order_id).await;
    h.bus
        .publish_event(
            InventoryReserveResult::TOPIC,
            &order_id.to_string(),
            InventoryReserveResult::EVENT_TYPE,
            &inventory[0],
        )
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.status(order_id).await, OrderStatus::Refunded);
    assert_eq!(h.published::<RefundRequest>(order_id).await.len(), 1);
    assert_eq!(h.payments.refund_count().await, 1);
}

#[tokio::test]
async fn test_checkout_with_delivery_parameters_ships_to_address() {
    let h = TestHarness::new(&[("P1", 5)]);
    let delivery = DeliveryParameters {
        address: Some("12 Rue de la Paix".to_string()),
        city: Some("Paris".to_string()),
        country: Some("France".to_string()),
        ..Default::default()
    };

    let order = h
        .saga()
        .checkout(
            Checkout::new(
                UserId::new(9),
                vec![OrderItem::new("P1", 1, Money::from_dollars(4))],
            )
            .with_idempotency_key("cart-9")
            .with_delivery(delivery),
        )
        .await
        .unwrap();
    h.settle().await;

    let requests: Vec<ShippingRequest> = h.published(order.id()).await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].address.city, "Paris");
    assert_eq!(requests[0].address.state, "State");
    assert_eq!(requests[0].address.zip_code, "000000");
    assert_eq!(requests[0].amount, Money::from_dollars(4));
}

#[tokio::test]
async fn test_orders_compete_for_limited_stock() {
    let h = TestHarness::new(&[("P1", 3)]);

    let mut orders = Vec::new();
    for _ in 0..5 {
        orders.push(h.checkout(&[("P1", 1, 10)]).await);
    }
    h.settle().await;

    let mut confirmed = 0;
    let mut refunded = 0;
    for order_id in orders {
        match h.status(order_id).await {
            OrderStatus::Confirmed => confirmed += 1,
            OrderStatus::Refunded => refunded += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(confirmed, 3);
    assert_eq!(refunded, 2);
    assert_eq!(h.available("P1").await, 0);
}

#[tokio::test]
async fn test_spawned_runtime_completes_saga() {
    let h = TestHarness::new(&[("P1", 5)]);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = h.runtime.spawn(shutdown_rx);

    let order_id = h.checkout(&[("P1", 1, 10)]).await;
    for _ in 0..200 {
        if h.status(order_id).await == OrderStatus::Confirmed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.status(order_id).await, OrderStatus::Confirmed);
    assert_eq!(h.available("P1").await, 4);
    assert!(h.bus.partitions() > 0);
}
