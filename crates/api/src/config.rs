//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use common::ProductId;
use saga::SagaConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory stores when unset
/// - `BUS_PARTITIONS`: partitions per bus topic (default: `8`)
/// - `BUS_MAX_DELIVERY_ATTEMPTS`: attempts before dead-lettering (default: `5`)
/// - `OUTBOX_POLL_INTERVAL_MS`: idle outbox poll interval (default: `50`)
/// - `SIMULATE_COLLABORATORS`: run the payment, shipping and notification
///   simulators in-process (default: `true`)
/// - `SEED_STOCK`: initial stock as `SKU=qty,SKU=qty` (default: empty)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub bus_partitions: usize,
    pub max_delivery_attempts: u32,
    pub outbox_poll_interval: Duration,
    pub simulate_collaborators: bool,
    pub seed_stock: Vec<(ProductId, u32)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var::<u16>(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            bus_partitions: parse_var::<usize>(&lookup, "BUS_PARTITIONS")
                .filter(|p| *p > 0)
                .unwrap_or(defaults.bus_partitions),
            max_delivery_attempts: parse_var::<u32>(&lookup, "BUS_MAX_DELIVERY_ATTEMPTS")
                .filter(|a| *a > 0)
                .unwrap_or(defaults.max_delivery_attempts),
            outbox_poll_interval: parse_var::<u64>(&lookup, "OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            simulate_collaborators: parse_var::<bool>(&lookup, "SIMULATE_COLLABORATORS")
                .unwrap_or(defaults.simulate_collaborators),
            seed_stock: lookup("SEED_STOCK")
                .map(|s| parse_stock(&s))
                .unwrap_or_default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the saga runtime tunables.
    pub fn saga(&self) -> SagaConfig {
        SagaConfig {
            max_delivery_attempts: self.max_delivery_attempts,
            outbox_poll_interval: self.outbox_poll_interval,
            ..SagaConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            bus_partitions: 8,
            max_delivery_attempts: saga.max_delivery_attempts,
            outbox_poll_interval: saga.outbox_poll_interval,
            simulate_collaborators: true,
            seed_stock: Vec::new(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Parses `SKU=qty` pairs separated by commas. Malformed pairs are skipped.
fn parse_stock(value: &str) -> Vec<(ProductId, u32)> {
    value
        .split(',')
        .filter_map(|pair| {
            let (sku, qty) = pair.split_once('=')?;
            let sku = sku.trim();
            if sku.is_empty() {
                return None;
            }
            Some((ProductId::new(sku), qty.trim().parse().ok()?))
        })
        .collect()
}
