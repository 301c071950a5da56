//! Stock records.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use tokio::sync::RwLock;

use crate::error::{InventoryError, Result};

/// Storage for available stock per product.
///
/// Quantities never go below zero. `try_reserve` is the only decrementing
/// operation and must be atomic: the check and the decrement happen as one
/// step.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Decrements stock by `quantity` if enough is available.
    ///
    /// Returns `false` (and leaves stock unchanged) when stock is
    /// insufficient or the product is unknown.
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<bool>;

    /// Increments stock by `quantity`.
    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()>;

    /// Returns the available quantity (zero for unknown products).
    async fn available(&self, product_id: &ProductId) -> Result<u32>;

    /// Sets the available quantity, creating the record if needed.
    async fn set_quantity(&self, product_id: &ProductId, quantity: u32) -> Result<()>;
}

#[derive(Debug, Default)]
struct StockState {
    quantities: HashMap<ProductId, u32>,
    fail_on_reserve: Option<ProductId>,
    fail_on_release: bool,
}

/// In-memory stock store for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<StockState>>,
}

impl InMemoryStockStore {
    /// Creates an empty stock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the given quantities.
    pub fn with_stock<P: Into<ProductId>>(stock: impl IntoIterator<Item = (P, u32)>) -> Self {
        let quantities = stock.into_iter().map(|(p, q)| (p.into(), q)).collect();
        Self {
            state: Arc::new(RwLock::new(StockState {
                quantities,
                ..Default::default()
            })),
        }
    }

    /// Makes `try_reserve` fail with an error for the given product.
    pub async fn set_fail_on_reserve(&self, product_id: Option<ProductId>) {
        self.state.write().await.fail_on_reserve = product_id;
    }

    /// Makes every `release` fail with an error.
    pub async fn set_fail_on_release(&self, fail: bool) {
        self.state.write().await.fail_on_release = fail;
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        let mut state = self.state.write().await;

        if state.fail_on_reserve.as_ref() == Some(product_id) {
            return Err(InventoryError::StoreUnavailable(format!(
                "simulated failure reserving {product_id}"
            )));
        }

        match state.quantities.get_mut(product_id) {
            Some(available) if *available >= quantity => {
                *available -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let mut state = self.state.write().await;

        if state.fail_on_release {
            return Err(InventoryError::StoreUnavailable(format!(
                "simulated failure releasing {product_id}"
            )));
        }

        let available = state.quantities.entry(product_id.clone()).or_insert(0);
        *available = available
            .checked_add(quantity)
            .ok_or_else(|| InventoryError::QuantityOutOfRange {
                product_id: product_id.clone(),
                quantity,
            })?;
        Ok(())
    }

    async fn available(&self, product_id: &ProductId) -> Result<u32> {
        Ok(self
            .state
            .read()
            .await
            .quantities
            .get(product_id)
            .copied()
            .unwrap_or(0))
    }

    async fn set_quantity(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        self.state
            .write()
            .await
            .quantities
            .insert(product_id.clone(), quantity);
        Ok(())
    }
}
