use std::collections::BTreeSet;

use async_trait::async_trait;
use common::{Money, OrderId, UserId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DeliveryParameters, DomainError, Order, OrderItem, OrderStatus, OutboundEvent, OutboxRecord,
    Result, SagaStep, Version, store::OrderStore,
};

const ORDER_COLUMNS: &str = "id, user_id, status, items, total_price_cents, idempotency_key, \
     checkout_batch_id, delivery, transaction_ref, shipment_id, tracking_number, failure_reason, \
     refund_requested, cancelled, handled_steps, version, created_at, updated_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let items: serde_json::Value = row.try_get("items")?;
        let delivery: Option<serde_json::Value> = row.try_get("delivery")?;
        let handled_steps: serde_json::Value = row.try_get("handled_steps")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            items: serde_json::from_value::<Vec<OrderItem>>(items)?,
            total_price: Money::from_cents(row.try_get("total_price_cents")?),
            status: status.parse::<OrderStatus>()?,
            idempotency_key: row.try_get("idempotency_key")?,
            checkout_batch_id: row.try_get("checkout_batch_id")?,
            delivery: delivery
                .map(serde_json::from_value::<DeliveryParameters>)
                .transpose()?,
            transaction_ref: row.try_get("transaction_ref")?,
            shipment_id: row.try_get("shipment_id")?,
            tracking_number: row.try_get("tracking_number")?,
            failure_reason: row.try_get("failure_reason")?,
            refund_requested: row.try_get("refund_requested")?,
            cancelled: row.try_get("cancelled")?,
            handled_steps: serde_json::from_value::<BTreeSet<SagaStep>>(handled_steps)?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
        Ok(OutboxRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            event: OutboundEvent {
                topic: row.try_get("topic")?,
                key: row.try_get("partition_key")?,
                event_type: row.try_get("event_type")?,
                payload: row.try_get("payload")?,
            },
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    async fn insert_outbox(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
        outbox: Vec<OutboundEvent>,
    ) -> Result<()> {
        for event in outbox {
            let record = OutboxRecord::new(order_id, event);
            sqlx::query(
                r#"
                INSERT INTO order_outbox (id, order_id, topic, partition_key, event_type, payload, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id)
            .bind(order_id.as_uuid())
            .bind(&record.event.topic)
            .bind(&record.event.key)
            .bind(&record.event.event_type)
            .bind(&record.event.payload)
            .bind(record.created_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn create(&self, mut order: Order) -> Result<Order> {
        order.version = order.version.next();

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, items, total_price_cents, idempotency_key,
                checkout_batch_id, delivery, transaction_ref, shipment_id, tracking_number,
                failure_reason, refund_requested, cancelled, handled_steps, version, created_at,
                updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_i64())
        .bind(order.status.as_str())
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.total_price.cents())
        .bind(&order.idempotency_key)
        .bind(&order.checkout_batch_id)
        .bind(order.delivery.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&order.transaction_ref)
        .bind(&order.shipment_id)
        .bind(&order.tracking_number)
        .bind(&order.failure_reason)
        .bind(order.refund_requested)
        .bind(order.cancelled)
        .bind(serde_json::to_value(&order.handled_steps)?)
        .bind(order.version.as_i64())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_order_idempotency_key")
            {
                return DomainError::DuplicateIdempotencyKey(
                    order.idempotency_key.clone().unwrap_or_default(),
                );
            }
            DomainError::Database(e)
        })?;

        Ok(order)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self, order, outbox), fields(order_id = %order.id(), status = %order.status()))]
    async fn commit(&self, mut order: Order, outbox: Vec<OutboundEvent>) -> Result<Order> {
        let expected = order.version;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, delivery = $4, transaction_ref = $5, shipment_id = $6,
                tracking_number = $7, failure_reason = $8, refund_requested = $9,
                cancelled = $10, handled_steps = $11, updated_at = $12, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(expected.as_i64())
        .bind(order.status.as_str())
        .bind(order.delivery.as_ref().map(serde_json::to_value).transpose()?)
        .bind(&order.transaction_ref)
        .bind(&order.shipment_id)
        .bind(&order.tracking_number)
        .bind(&order.failure_reason)
        .bind(order.refund_requested)
        .bind(order.cancelled)
        .bind(serde_json::to_value(&order.handled_steps)?)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM orders WHERE id = $1")
                .bind(order.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match actual {
                Some(actual) => DomainError::ConcurrencyConflict {
                    order_id: order.id,
                    expected,
                    actual: Version::new(actual),
                },
                None => DomainError::OrderNotFound(order.id),
            });
        }

        Self::insert_outbox(&mut tx, order.id, outbox).await?;
        tx.commit().await?;

        order.version = expected.next();
        Ok(order)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, topic, partition_key, event_type, payload, created_at, published_at
            FROM order_outbox
            WHERE published_at IS NULL
            ORDER BY seq ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_published(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE order_outbox SET published_at = NOW() WHERE id = ANY($1) AND published_at IS NULL",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
