//! Idempotent inventory reservation handler.

use std::sync::Arc;

use common::{CorrelationId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::ledger::{LedgerEntry, LedgerStatus, ReservationLedger};
use crate::stock::StockStore;

/// Reason reported when a replayed entry carries no stored reason.
pub const PREVIOUSLY_FAILED: &str = "Previously failed";

/// Suffix of the ledger correlation id used by restores.
const RESTORE_SUFFIX: &str = "restore";

/// One product line of a reservation or restore request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A request to reserve stock for an order.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    pub items: Vec<StockLine>,
}

/// A request to give back stock reserved for an order.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    pub items: Vec<StockLine>,
    pub reason: String,
}

/// Aggregate result of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Failed,
}

/// Per-line result of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineOutcome {
    pub product_id: ProductId,
    pub quantity: u32,
    pub reserved: bool,
}

/// Result of processing a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationOutcome {
    pub order_id: OrderId,
    pub correlation_id: CorrelationId,
    pub status: ReservationStatus,
    pub items: Vec<LineOutcome>,
    pub failure_reason: Option<String>,

    /// True if this outcome was read back from the ledger instead of being
    /// computed now.
    #[serde(skip)]
    pub replayed: bool,
}

impl ReservationOutcome {
    /// Returns true if every line was reserved.
    pub fn is_reserved(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }

    fn from_entry(entry: &LedgerEntry, request: &ReservationRequest) -> Self {
        let stored: Option<StoredDetails> = serde_json::from_value(entry.details.clone()).ok();
        let status = match entry.status {
            LedgerStatus::Reserved => ReservationStatus::Reserved,
            LedgerStatus::Failed | LedgerStatus::Restored => ReservationStatus::Failed,
        };

        let (items, failure_reason) = match stored {
            Some(details) => (details.items, details.failure_reason),
            None => (
                request
                    .items
                    .iter()
                    .map(|line| LineOutcome {
                        product_id: line.product_id.clone(),
                        quantity: line.quantity,
                        reserved: status == ReservationStatus::Reserved,
                    })
                    .collect(),
                None,
            ),
        };

        let failure_reason = match status {
            ReservationStatus::Reserved => None,
            ReservationStatus::Failed => {
                Some(failure_reason.unwrap_or_else(|| PREVIOUSLY_FAILED.to_string()))
            }
        };

        Self {
            order_id: entry.order_id,
            correlation_id: entry.correlation_id.clone(),
            status,
            items,
            failure_reason,
            replayed: true,
        }
    }
}

/// Result of processing a restore request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Stock was given back. `failed` lists lines whose increment failed and
    /// need an operator.
    Applied { failed: Vec<StockLine> },

    /// The restore was already applied for this order.
    AlreadyApplied,
}

/// Detail payload stored with each reservation ledger entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDetails {
    items: Vec<LineOutcome>,
    failure_reason: Option<String>,
}

/// Processes reservation and restore requests against the stock store,
/// guarded by the reservation ledger.
///
/// For any correlation id, stock is changed at most once: a request whose
/// correlation id is already in the ledger is answered from the ledger.
pub struct ReservationHandler<S: StockStore + ?Sized, L: ReservationLedger + ?Sized> {
    stock: Arc<S>,
    ledger: Arc<L>,
}

impl<S: StockStore + ?Sized, L: ReservationLedger + ?Sized> Clone for ReservationHandler<S, L> {
    fn clone(&self) -> Self {
        Self {
            stock: Arc::clone(&self.stock),
            ledger: Arc::clone(&self.ledger),
        }
    }
}

impl<S: StockStore + ?Sized, L: ReservationLedger + ?Sized> ReservationHandler<S, L> {
    /// Creates a handler over the given stores.
    pub fn new(stock: Arc<S>, ledger: Arc<L>) -> Self {
        Self { stock, ledger }
    }

    /// Returns the stock store.
    pub fn stock(&self) -> &Arc<S> {
        &self.stock
    }

    /// Returns the ledger.
    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Reserves every line of the request, or none of them.
    ///
    /// Lines are reserved in request order. The first line that cannot be
    /// reserved stops processing and every line reserved so far is released.
    /// The outcome is written to the ledger before it is returned, so the
    /// caller may publish it.
    ///
    /// Returns an error only if the ledger could not be read or written; stock
    /// is left as it was before the call in that case.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, correlation_id = %request.correlation_id))]
    pub async fn reserve(&self, request: &ReservationRequest) -> Result<ReservationOutcome> {
        if let Some(entry) = self.ledger.find(&request.correlation_id).await? {
            return Ok(self.replay(&entry, request));
        }

        let mut reserved: Vec<&StockLine> = Vec::with_capacity(request.items.len());
        let mut failure_reason = None;

        for line in &request.items {
            match self.stock.try_reserve(&line.product_id, line.quantity).await {
                Ok(true) => reserved.push(line),
                Ok(false) => {
                    tracing::info!(
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        "Insufficient inventory"
                    );
                    failure_reason = Some(format!(
                        "Insufficient inventory for product: {}",
                        line.product_id
                    ));
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        product_id = %line.product_id,
                        error = %e,
                        "Inventory processing error"
                    );
                    failure_reason = Some(format!("Inventory processing error: {e}"));
                    break;
                }
            }
        }

        if failure_reason.is_some() {
            self.roll_back(request.order_id, &reserved).await;
        }

        let status = if failure_reason.is_none() {
            ReservationStatus::Reserved
        } else {
            ReservationStatus::Failed
        };
        let items = request
            .items
            .iter()
            .map(|line| LineOutcome {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                reserved: status == ReservationStatus::Reserved,
            })
            .collect::<Vec<_>>();

        let details = serde_json::to_value(StoredDetails {
            items: items.clone(),
            failure_reason: failure_reason.clone(),
        })?;
        let entry = LedgerEntry::new(
            request.correlation_id.clone(),
            request.order_id,
            match status {
                ReservationStatus::Reserved => LedgerStatus::Reserved,
                ReservationStatus::Failed => LedgerStatus::Failed,
            },
            details,
        );

        if let Err(e) = self.ledger.record(entry).await {
            if status == ReservationStatus::Reserved {
                self.roll_back(request.order_id, &reserved).await;
            }
            return match e {
                InventoryError::DuplicateCorrelation(_) => {
                    tracing::warn!("Concurrent reservation for the same correlation id");
                    let entry = self
                        .ledger
                        .find(&request.correlation_id)
                        .await?
                        .ok_or(e)?;
                    Ok(self.replay(&entry, request))
                }
                other => Err(other),
            };
        }

        let outcome_label = match status {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Failed => "failed",
        };
        metrics::counter!("inventory_reservations_total", "outcome" => outcome_label).increment(1);

        tracing::info!(
            status = ?status,
            reason = failure_reason.as_deref().unwrap_or(""),
            "Reservation processed"
        );

        Ok(ReservationOutcome {
            order_id: request.order_id,
            correlation_id: request.correlation_id.clone(),
            status,
            items,
            failure_reason,
            replayed: false,
        })
    }

    /// Gives back the stock of a compensated order, at most once per order.
    ///
    /// The restore is claimed in the ledger under `<correlation-id>:restore`
    /// before stock is touched. A line whose increment fails is logged for
    /// manual intervention and reported in the outcome; it is not retried.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, reason = %request.reason))]
    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreOutcome> {
        let restore_id = request.correlation_id.derive(RESTORE_SUFFIX);

        let entry = LedgerEntry::new(
            restore_id,
            request.order_id,
            LedgerStatus::Restored,
            serde_json::json!({
                "items": request.items,
                "reason": request.reason,
            }),
        );

        match self.ledger.record(entry).await {
            Ok(()) => {}
            Err(InventoryError::DuplicateCorrelation(_)) => {
                tracing::info!("Restore already applied");
                return Ok(RestoreOutcome::AlreadyApplied);
            }
            Err(e) => return Err(e),
        }

        let mut failed = Vec::new();
        for line in &request.items {
            if let Err(e) = self.stock.release(&line.product_id, line.quantity).await {
                tracing::error!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    manual_intervention = true,
                    "Failed to restore stock"
                );
                metrics::counter!("inventory_rollback_failures_total").increment(1);
                failed.push(line.clone());
            }
        }

        tracing::info!(lines = request.items.len(), "Stock restored");
        Ok(RestoreOutcome::Applied { failed })
    }

    fn replay(&self, entry: &LedgerEntry, request: &ReservationRequest) -> ReservationOutcome {
        metrics::counter!("inventory_reservation_replays_total").increment(1);
        tracing::info!(status = %entry.status, "Replaying recorded reservation outcome");
        ReservationOutcome::from_entry(entry, request)
    }

    async fn roll_back(&self, order_id: OrderId, reserved: &[&StockLine]) {
        for line in reserved {
            if let Err(e) = self.stock.release(&line.product_id, line.quantity).await {
                tracing::error!(
                    %order_id,
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    manual_intervention = true,
                    "Failed to roll back reserved stock"
                );
                metrics::counter!("inventory_rollback_failures_total").increment(1);
            }
        }
    }
}
