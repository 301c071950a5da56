//! HTTP API server for the order fulfillment saga.
//!
//! Exposes checkout, order queries and cancellation over REST, and wires the
//! saga runtime (orchestrator, inventory service, simulated collaborators and
//! outbox relay) onto an in-process event bus. Structured logging goes through
//! `tracing`; counters are exported in Prometheus format.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{InMemoryOrderStore, OrderStore};
use event_bus::InMemoryEventBus;
use inventory::{
    InMemoryReservationLedger, InMemoryStockStore, ReservationHandler, ReservationLedger,
    StockStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InventoryService, NotificationSink, OrderSaga, PaymentSimulator, SagaRuntime,
    ShippingSimulator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Saga runtime over type-erased stores and the in-process bus.
pub type Runtime = SagaRuntime<dyn OrderStore, InMemoryEventBus>;

/// The stores backing the service.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub stock: Arc<dyn StockStore>,
    pub ledger: Arc<dyn ReservationLedger>,
}

impl Stores {
    /// Volatile stores for local runs and tests.
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            stock: Arc::new(InMemoryStockStore::new()),
            ledger: Arc::new(InMemoryReservationLedger::new()),
        }
    }

    /// Sets the initial stock of each listed product.
    pub async fn seed_stock(&self, config: &Config) -> inventory::Result<()> {
        for (product_id, quantity) in &config.seed_stock {
            self.stock.set_quantity(product_id, *quantity).await?;
            tracing::info!(%product_id, quantity, "Stock seeded");
        }
        Ok(())
    }
}

/// Builds the saga runtime: orchestrator, inventory service and, when
/// enabled, the in-process payment, shipping and notification simulators.
pub fn create_runtime(stores: &Stores, config: &Config) -> Runtime {
    let bus = Arc::new(InMemoryEventBus::with_partitions(config.bus_partitions));
    let saga = Arc::new(OrderSaga::new(Arc::clone(&stores.orders)));

    let handler = ReservationHandler::new(Arc::clone(&stores.stock), Arc::clone(&stores.ledger));
    let runtime = SagaRuntime::new(saga, Arc::clone(&bus), &config.saga())
        .with_inventory(InventoryService::new(handler, Arc::clone(&bus)));

    if !config.simulate_collaborators {
        return runtime;
    }

    runtime
        .with_payment(PaymentSimulator::new(Arc::clone(&bus)))
        .with_shipping(ShippingSimulator::new(Arc::clone(&bus)))
        .with_notifications(NotificationSink::new())
}

/// Creates the handler state for a runtime.
pub fn create_state(runtime: &Runtime) -> Arc<AppState> {
    Arc::new(AppState {
        saga: Arc::clone(runtime.saga()),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::checkout).get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
