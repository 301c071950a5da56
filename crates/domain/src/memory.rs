use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{DomainError, Order, OutboundEvent, OutboxRecord, Result, store::OrderStore};

#[derive(Default)]
struct StoreState {
    orders: HashMap<OrderId, Order>,
    idempotency_keys: HashMap<String, OrderId>,
    outbox: Vec<OutboxRecord>,
}

/// In-memory order store implementation for testing.
///
/// Provides the same atomicity and version checks as the PostgreSQL store:
/// the order row and its outbox records are written under one lock.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns every outbox record, published or not, in commit order.
    pub async fn outbox(&self) -> Vec<OutboxRecord> {
        self.state.read().await.outbox.clone()
    }

    /// Returns the outbox records committed for one order.
    pub async fn outbox_for(&self, order_id: OrderId) -> Vec<OutboxRecord> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, mut order: Order) -> Result<Order> {
        let mut state = self.state.write().await;

        if let Some(key) = order.idempotency_key()
            && state.idempotency_keys.contains_key(key)
        {
            return Err(DomainError::DuplicateIdempotencyKey(key.to_string()));
        }

        order.version = order.version.next();
        if let Some(key) = order.idempotency_key.clone() {
            state.idempotency_keys.insert(key, order.id);
        }
        state.orders.insert(order.id, order.clone());

        Ok(order)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn commit(&self, mut order: Order, outbox: Vec<OutboundEvent>) -> Result<Order> {
        let mut state = self.state.write().await;

        let actual = state
            .orders
            .get(&order.id)
            .map(|stored| stored.version)
            .ok_or(DomainError::OrderNotFound(order.id))?;

        if actual != order.version {
            return Err(DomainError::ConcurrencyConflict {
                order_id: order.id,
                expected: order.version,
                actual,
            });
        }

        order.version = order.version.next();
        state.orders.insert(order.id, order.clone());
        state.outbox.extend(
            outbox
                .into_iter()
                .map(|event| OutboxRecord::new(order.id, event)),
        );

        Ok(order)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .filter(|r| !r.is_published())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        for record in state.outbox.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.published_at.get_or_insert(now);
        }
        Ok(())
    }
}
