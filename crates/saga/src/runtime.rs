//! Wiring of the orchestrator, its collaborators and the outbox relay onto an
//! event bus.

use std::sync::Arc;

use async_trait::async_trait;
use domain::OrderStore;
use event_bus::{Consumer, EventBus, MessageHandler, RetryPolicy};
use inventory::{ReservationLedger, StockStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SagaConfig;
use crate::consumers::SagaResultHandler;
use crate::error::Result;
use crate::orchestrator::OrderSaga;
use crate::order_fulfillment::{
    INVENTORY_GROUP, INVENTORY_RESERVE_REQUEST, INVENTORY_RESERVE_RESPONSE,
    INVENTORY_RESTORE_REQUEST, NOTIFICATION_GROUP, NOTIFICATION_REQUEST, ORDER_GROUP,
    PAYMENT_GROUP, PAYMENT_REQUEST, PAYMENT_RESPONSE, REFUND_REQUEST, SHIPPING_GROUP,
    SHIPPING_REQUEST, SHIPPING_RESPONSE,
};
use crate::relay::OutboxRelay;
use crate::services::{InventoryService, NotificationSink, PaymentSimulator, ShippingSimulator};

/// A subscribed consumer, independent of its handler type.
#[async_trait]
trait Worker: Send + Sync {
    async fn drain(&self) -> event_bus::Result<usize>;

    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>>;
}

#[async_trait]
impl<B, H> Worker for Consumer<B, H>
where
    B: EventBus + ?Sized + 'static,
    H: MessageHandler + 'static,
{
    async fn drain(&self) -> event_bus::Result<usize> {
        Consumer::drain(self).await
    }

    fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        Consumer::spawn(self, shutdown)
    }
}

/// The running saga: orchestrator consumers, collaborator consumers and the
/// outbox relay, all on one bus.
pub struct SagaRuntime<S: OrderStore + ?Sized, B: EventBus + ?Sized> {
    saga: Arc<OrderSaga<S>>,
    bus: Arc<B>,
    relay: Arc<OutboxRelay<S, B>>,
    retry: RetryPolicy,
    workers: Vec<Arc<dyn Worker>>,
}

impl<S, B> SagaRuntime<S, B>
where
    S: OrderStore + ?Sized + 'static,
    B: EventBus + ?Sized + 'static,
{
    /// Subscribes the orchestrator to every response topic.
    pub fn new(saga: Arc<OrderSaga<S>>, bus: Arc<B>, config: &SagaConfig) -> Self {
        let relay = Arc::new(OutboxRelay::new(
            Arc::clone(saga.store()),
            Arc::clone(&bus),
            config.outbox_batch_size,
            config.outbox_poll_interval,
        ));

        let mut runtime = Self {
            saga: Arc::clone(&saga),
            bus,
            relay,
            retry: config.retry_policy(),
            workers: Vec::new(),
        };

        let results = Arc::new(SagaResultHandler::new(saga));
        for topic in [PAYMENT_RESPONSE, INVENTORY_RESERVE_RESPONSE, SHIPPING_RESPONSE] {
            runtime.subscribe(ORDER_GROUP, topic, Arc::clone(&results));
        }
        runtime
    }

    /// Subscribes `handler` to `topic` as a member of `group`.
    pub fn subscribe<H>(&mut self, group: &str, topic: &str, handler: Arc<H>)
    where
        H: MessageHandler + 'static,
    {
        tracing::debug!(group, topic, handler = handler.name(), "Consumer registered");
        let consumer = Consumer::new(Arc::clone(&self.bus), handler, group, topic)
            .with_retry(self.retry);
        self.workers.push(Arc::new(consumer));
    }

    /// Serves reservation and restore requests.
    pub fn with_inventory<SS, L>(mut self, service: InventoryService<SS, L, B>) -> Self
    where
        SS: StockStore + ?Sized + 'static,
        L: ReservationLedger + ?Sized + 'static,
    {
        let service = Arc::new(service);
        self.subscribe(INVENTORY_GROUP, INVENTORY_RESERVE_REQUEST, Arc::clone(&service));
        self.subscribe(INVENTORY_GROUP, INVENTORY_RESTORE_REQUEST, service);
        self
    }

    /// Serves charge and refund requests with the payment simulator.
    pub fn with_payment(mut self, payments: PaymentSimulator<B>) -> Self {
        let payments = Arc::new(payments);
        self.subscribe(PAYMENT_GROUP, PAYMENT_REQUEST, Arc::clone(&payments));
        self.subscribe(PAYMENT_GROUP, REFUND_REQUEST, payments);
        self
    }

    /// Serves shipping requests with the shipping simulator.
    pub fn with_shipping(mut self, shipping: ShippingSimulator<B>) -> Self {
        self.subscribe(SHIPPING_GROUP, SHIPPING_REQUEST, Arc::new(shipping));
        self
    }

    /// Delivers notifications to the sink.
    pub fn with_notifications(mut self, sink: NotificationSink) -> Self {
        self.subscribe(NOTIFICATION_GROUP, NOTIFICATION_REQUEST, Arc::new(sink));
        self
    }

    /// Returns the orchestrator.
    pub fn saga(&self) -> &Arc<OrderSaga<S>> {
        &self.saga
    }

    /// Returns the bus.
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Relays and consumes until no outbox record and no message is pending.
    ///
    /// Returns the number of messages consumed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut consumed = 0;
        loop {
            let published = self.relay.relay_once().await?;
            let mut round = 0;
            for worker in &self.workers {
                round += worker.drain().await?;
            }
            consumed += round;

            if published == 0 && round == 0 {
                return Ok(consumed);
            }
        }
    }

    /// Spawns the relay and one task per consumer partition.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![Arc::clone(&self.relay).spawn(shutdown.clone())];
        for worker in &self.workers {
            handles.extend(Arc::clone(worker).spawn(shutdown.clone()));
        }
        tracing::info!(
            consumers = self.workers.len(),
            tasks = handles.len(),
            "Saga runtime started"
        );
        handles
    }
}
