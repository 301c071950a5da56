//! Reservation ledger.
//!
//! One entry per correlation id records the outcome of a processed request.
//! The presence of an entry means the request must not be applied again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};

/// Coarse-grained outcome stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Reserved,
    Failed,
    Restored,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Reserved => "RESERVED",
            LedgerStatus::Failed => "FAILED",
            LedgerStatus::Restored => "RESTORED",
        }
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RESERVED" => Ok(LedgerStatus::Reserved),
            "FAILED" => Ok(LedgerStatus::Failed),
            "RESTORED" => Ok(LedgerStatus::Restored),
            other => Err(InventoryError::UnknownLedgerStatus(other.to_string())),
        }
    }
}

/// A processed request recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub correlation_id: CorrelationId,
    pub order_id: OrderId,
    pub status: LedgerStatus,

    /// Free-form detail payload (per-line results, failure reason).
    pub details: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Creates a new entry stamped with the current time.
    pub fn new(
        correlation_id: CorrelationId,
        order_id: OrderId,
        status: LedgerStatus,
        details: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            order_id,
            status,
            details,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable store of ledger entries, unique by correlation id.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Looks up the entry for a correlation id.
    async fn find(&self, correlation_id: &CorrelationId) -> Result<Option<LedgerEntry>>;

    /// Inserts a new entry.
    ///
    /// Fails with `DuplicateCorrelation` if an entry already exists for the
    /// same correlation id; the existing entry is left untouched.
    async fn record(&self, entry: LedgerEntry) -> Result<()>;

    /// Lists every entry recorded for an order.
    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>>;
}

/// In-memory reservation ledger for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReservationLedger {
    entries: Arc<RwLock<HashMap<CorrelationId, LedgerEntry>>>,
}

impl InMemoryReservationLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the ledger has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn find(&self, correlation_id: &CorrelationId) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.read().await.get(correlation_id).cloned())
    }

    async fn record(&self, entry: LedgerEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.correlation_id) {
            return Err(InventoryError::DuplicateCorrelation(entry.correlation_id));
        }
        entries.insert(entry.correlation_id.clone(), entry);
        Ok(())
    }

    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}
