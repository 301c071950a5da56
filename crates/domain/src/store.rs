use async_trait::async_trait;
use common::{OrderId, UserId};
use uuid::Uuid;

use crate::{Order, OutboundEvent, OutboxRecord, Result};

/// Durable storage for orders and their outbox.
///
/// Every state change of an order goes through [`OrderStore::commit`], which
/// persists the new order state and the events it produced atomically. The
/// commit is rejected with `ConcurrencyConflict` if the stored version differs
/// from the version the order was read at.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and returns it with its stored version.
    ///
    /// Fails with `DuplicateIdempotencyKey` if another order already uses the
    /// same idempotency key.
    async fn create(&self, order: Order) -> Result<Order>;

    /// Loads an order by id.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads the order created with the given idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Atomically stores the order's new state together with its outbound
    /// events. Returns the order with its new version.
    async fn commit(&self, order: Order, outbox: Vec<OutboundEvent>) -> Result<Order>;

    /// Returns up to `limit` unpublished outbox records in commit order.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Marks outbox records as published.
    async fn mark_published(&self, ids: &[Uuid]) -> Result<()>;
}
