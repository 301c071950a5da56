use async_trait::async_trait;
use common::{CorrelationId, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    InventoryError, LedgerEntry, LedgerStatus, ReservationLedger, Result, StockStore,
};

/// PostgreSQL-backed stock store.
///
/// The decrement is a single conditional `UPDATE`, so concurrent
/// reservations never drive a quantity below zero.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn to_db_quantity(product_id: &ProductId, quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| InventoryError::QuantityOutOfRange {
        product_id: product_id.clone(),
        quantity,
    })
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn try_reserve(&self, product_id: &ProductId, quantity: u32) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE stock
            SET quantity = quantity - $2, updated_at = NOW()
            WHERE product_id = $1 AND quantity >= $2
            "#,
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(product_id, quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn release(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = stock.quantity + EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(product_id, quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn available(&self, product_id: &ProductId) -> Result<u32> {
        let quantity: Option<i32> =
            sqlx::query_scalar("SELECT quantity FROM stock WHERE product_id = $1")
                .bind(product_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(quantity.map_or(0, |q| u32::try_from(q).unwrap_or(0)))
    }

    async fn set_quantity(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            "#,
        )
        .bind(product_id.as_str())
        .bind(to_db_quantity(product_id, quantity)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// PostgreSQL-backed reservation ledger.
///
/// Uniqueness of the correlation id is enforced by a table constraint.
#[derive(Clone)]
pub struct PostgresReservationLedger {
    pool: PgPool,
}

impl PostgresReservationLedger {
    /// Creates a new PostgreSQL reservation ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: PgRow) -> Result<LedgerEntry> {
        let status: String = row.try_get("status")?;

        Ok(LedgerEntry {
            correlation_id: CorrelationId::new(row.try_get::<String, _>("correlation_id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            status: status.parse::<LedgerStatus>()?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ReservationLedger for PostgresReservationLedger {
    async fn find(&self, correlation_id: &CorrelationId) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query(
            r#"
            SELECT correlation_id, order_id, status, details, created_at, updated_at
            FROM inventory_reservations
            WHERE correlation_id = $1
            "#,
        )
        .bind(correlation_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn record(&self, entry: LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_reservations (correlation_id, order_id, status, details, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.correlation_id.as_str())
        .bind(entry.order_id.as_uuid())
        .bind(entry.status.as_str())
        .bind(&entry.details)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_reservation_correlation_id")
            {
                return InventoryError::DuplicateCorrelation(entry.correlation_id.clone());
            }
            InventoryError::Database(e)
        })?;

        Ok(())
    }

    async fn entries_for_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT correlation_id, order_id, status, details, created_at, updated_at
            FROM inventory_reservations
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}
