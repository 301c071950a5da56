//! API server entry point.

use std::sync::Arc;

use api::Stores;
use api::config::{Config, LogFormat};
use domain::PostgresOrderStore;
use inventory::{PostgresReservationLedger, PostgresStockStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn connect_stores(config: &Config) -> Stores {
    let Some(url) = config.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set, using in-memory stores");
        return Stores::in_memory();
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");

    let orders = PostgresOrderStore::new(pool.clone());
    orders
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("connected to PostgreSQL");

    Stores {
        orders: Arc::new(orders),
        stock: Arc::new(PostgresStockStore::new(pool.clone())),
        ledger: Arc::new(PostgresReservationLedger::new(pool)),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open stores and seed stock
    let stores = connect_stores(&config).await;
    stores
        .seed_stock(&config)
        .await
        .expect("failed to seed stock");

    // 4. Start the saga runtime
    let runtime = api::create_runtime(&stores, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = runtime.spawn(shutdown_rx);

    // 5. Build the application
    let app = api::create_app(api::create_state(&runtime), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(
        %addr,
        simulate_collaborators = config.simulate_collaborators,
        partitions = config.bus_partitions,
        "starting API server"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Stop consumers and the outbox relay
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "saga worker ended abnormally");
        }
    }

    tracing::info!("server shut down gracefully");
}
