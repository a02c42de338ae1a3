//! PostgreSQL purchase store
//!
//! `purchases_tb` holds the flat column layout; the tagged lifecycle is
//! rebuilt on read through [`Lifecycle::from_columns`], so a row whose timers
//! contradict its status surfaces as [`PurchaseError::Storage`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{BuyerStats, Page, PurchaseStore};
use crate::purchase::error::PurchaseError;
use crate::purchase::state::PurchaseStatus;
use crate::purchase::types::{
    Lifecycle, LifecycleColumns, OrderRef, ProductId, Purchase, PurchaseId, UserId,
};

/// Statuses counted as paid in buyer stats and ownership checks
const PAID_STATUSES: &str = "('completed', 'dispute_requested', 'dispute_processing', 'confirmed')";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS purchases_tb (
        purchase_id              VARCHAR(26) PRIMARY KEY,
        order_ref                VARCHAR(64) NOT NULL UNIQUE,
        buyer_id                 BIGINT NOT NULL,
        product_id               BIGINT NOT NULL,
        price                    NUMERIC(20, 8) NOT NULL CHECK (price > 0),
        asset_ref                TEXT,
        status                   VARCHAR(32) NOT NULL,
        auto_confirm_at          TIMESTAMPTZ,
        dispute_reason           TEXT,
        dispute_requested_at     TIMESTAMPTZ,
        platform_intervention_at TIMESTAMPTZ,
        dispute_resolved_at      TIMESTAMPTZ,
        dispute_notes            TEXT,
        download_count           INTEGER NOT NULL DEFAULT 0,
        max_downloads            INTEGER NOT NULL DEFAULT 5,
        created_at               TIMESTAMPTZ NOT NULL,
        updated_at               TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_purchases_auto_confirm
        ON purchases_tb (auto_confirm_at)
        WHERE status = 'completed'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_purchases_intervention
        ON purchases_tb (platform_intervention_at)
        WHERE status = 'dispute_requested'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_purchases_buyer
        ON purchases_tb (buyer_id, created_at DESC)
    "#,
];

const SELECT_COLUMNS: &str = r#"
    SELECT purchase_id, order_ref, buyer_id, product_id, price, asset_ref, status,
           auto_confirm_at, dispute_reason, dispute_requested_at, platform_intervention_at,
           dispute_resolved_at, dispute_notes, download_count, max_downloads,
           created_at, updated_at
    FROM purchases_tb
"#;

pub struct PgPurchaseStore {
    pool: PgPool,
}

impl PgPurchaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create `purchases_tb` and its sweep indexes if missing
    pub async fn init_schema(&self) -> Result<(), PurchaseError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("purchases_tb schema ready");
        Ok(())
    }

    async fn fetch_many(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_purchase).collect()
    }

    async fn count(&self, sql: &str, bind: Option<i64>) -> Result<u64, PurchaseError> {
        let mut query = sqlx::query_scalar::<_, i64>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let total = query.fetch_one(&self.pool).await?;
        Ok(total.max(0) as u64)
    }
}

/// BIGINT id column back to its unsigned domain type
fn unsigned(column: &str, value: i64) -> Result<u64, PurchaseError> {
    u64::try_from(value)
        .map_err(|_| PurchaseError::Storage(format!("negative {}: {}", column, value)))
}

/// Convert a database row to a Purchase
fn row_to_purchase(row: &PgRow) -> Result<Purchase, PurchaseError> {
    let id_str: String = row.try_get("purchase_id")?;
    let id: PurchaseId = id_str
        .parse()
        .map_err(|_| PurchaseError::Storage(format!("Invalid purchase_id: {}", id_str)))?;

    let status_str: String = row.try_get("status")?;
    let status: PurchaseStatus = status_str.parse().map_err(PurchaseError::Storage)?;

    let columns = LifecycleColumns {
        status,
        auto_confirm_at: row.try_get("auto_confirm_at")?,
        dispute_reason: row.try_get("dispute_reason")?,
        dispute_requested_at: row.try_get("dispute_requested_at")?,
        platform_intervention_at: row.try_get("platform_intervention_at")?,
        dispute_resolved_at: row.try_get("dispute_resolved_at")?,
        dispute_notes: row.try_get("dispute_notes")?,
    };
    let lifecycle = Lifecycle::from_columns(columns)
        .map_err(|e| PurchaseError::Storage(format!("purchase {}: {}", id, e)))?;

    let buyer_id = unsigned("buyer_id", row.try_get("buyer_id")?)?;
    let product_id = unsigned("product_id", row.try_get("product_id")?)?;

    let order_ref: String = row.try_get("order_ref")?;
    let price: Decimal = row.try_get("price")?;

    Ok(Purchase {
        id,
        order_ref: OrderRef::from(order_ref),
        buyer_id,
        product_id,
        price,
        asset_ref: row.try_get("asset_ref")?,
        lifecycle,
        download_count: row.try_get("download_count")?,
        max_downloads: row.try_get("max_downloads")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PurchaseStore for PgPurchaseStore {
    async fn insert(&self, purchase: &Purchase) -> Result<(), PurchaseError> {
        let cols = purchase.lifecycle.to_columns();
        sqlx::query(
            r#"
            INSERT INTO purchases_tb
                (purchase_id, order_ref, buyer_id, product_id, price, asset_ref, status,
                 auto_confirm_at, dispute_reason, dispute_requested_at, platform_intervention_at,
                 dispute_resolved_at, dispute_notes, download_count, max_downloads,
                 created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(purchase.id.to_string())
        .bind(purchase.order_ref.as_str())
        .bind(purchase.buyer_id as i64)
        .bind(purchase.product_id as i64)
        .bind(purchase.price)
        .bind(&purchase.asset_ref)
        .bind(cols.status.as_str())
        .bind(cols.auto_confirm_at)
        .bind(&cols.dispute_reason)
        .bind(cols.dispute_requested_at)
        .bind(cols.platform_intervention_at)
        .bind(cols.dispute_resolved_at)
        .bind(&cols.dispute_notes)
        .bind(purchase.download_count)
        .bind(purchase.max_downloads)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        let sql = format!("{} WHERE purchase_id = $1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_purchase).transpose()
    }

    /// Atomic CAS update: write the new lifecycle only if the status is unchanged
    async fn compare_and_swap(
        &self,
        expected: PurchaseStatus,
        next: &Purchase,
    ) -> Result<bool, PurchaseError> {
        let cols = next.lifecycle.to_columns();
        let result = sqlx::query(
            r#"
            UPDATE purchases_tb
            SET status = $1,
                auto_confirm_at = $2,
                dispute_reason = $3,
                dispute_requested_at = $4,
                platform_intervention_at = $5,
                dispute_resolved_at = $6,
                dispute_notes = $7,
                updated_at = $8
            WHERE purchase_id = $9 AND status = $10
            "#,
        )
        .bind(cols.status.as_str())
        .bind(cols.auto_confirm_at)
        .bind(&cols.dispute_reason)
        .bind(cols.dispute_requested_at)
        .bind(cols.platform_intervention_at)
        .bind(cols.dispute_resolved_at)
        .bind(&cols.dispute_notes)
        .bind(next.updated_at)
        .bind(next.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_due_auto_confirm(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let sql = format!(
            "{} WHERE status = $1 AND auto_confirm_at <= $2 ORDER BY auto_confirm_at ASC LIMIT $3",
            SELECT_COLUMNS
        );
        self.fetch_many(
            sqlx::query(&sql)
                .bind(PurchaseStatus::Completed.as_str())
                .bind(now)
                .bind(limit as i64),
        )
        .await
    }

    async fn find_due_escalation(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let sql = format!(
            "{} WHERE status = $1 AND platform_intervention_at <= $2 \
             ORDER BY platform_intervention_at ASC LIMIT $3",
            SELECT_COLUMNS
        );
        self.fetch_many(
            sqlx::query(&sql)
                .bind(PurchaseStatus::DisputeRequested.as_str())
                .bind(now)
                .bind(limit as i64),
        )
        .await
    }

    async fn list_pending_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Purchase>, PurchaseError> {
        let sql = format!(
            "{} WHERE status = $1 AND auto_confirm_at > $2 ORDER BY auto_confirm_at ASC",
            SELECT_COLUMNS
        );
        self.fetch_many(
            sqlx::query(&sql)
                .bind(PurchaseStatus::Completed.as_str())
                .bind(now),
        )
        .await
    }

    async fn list_pending_interventions(&self) -> Result<Vec<Purchase>, PurchaseError> {
        let sql = format!(
            "{} WHERE status = $1 ORDER BY platform_intervention_at ASC",
            SELECT_COLUMNS
        );
        self.fetch_many(sqlx::query(&sql).bind(PurchaseStatus::DisputeRequested.as_str()))
            .await
    }

    async fn list_disputes(&self, page: Page) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        let sql = format!(
            "{} WHERE status IN ('dispute_requested', 'dispute_processing') \
             ORDER BY dispute_requested_at DESC LIMIT $1 OFFSET $2",
            SELECT_COLUMNS
        );
        let rows = self
            .fetch_many(
                sqlx::query(&sql)
                    .bind(i64::from(page.limit()))
                    .bind(page.offset() as i64),
            )
            .await?;
        let total = self
            .count(
                "SELECT COUNT(*) FROM purchases_tb \
                 WHERE status IN ('dispute_requested', 'dispute_processing')",
                None,
            )
            .await?;
        Ok((rows, total))
    }

    async fn list_for_buyer(
        &self,
        buyer_id: UserId,
        page: Page,
    ) -> Result<(Vec<Purchase>, u64), PurchaseError> {
        let sql = format!(
            "{} WHERE buyer_id = $1 ORDER BY created_at DESC, purchase_id DESC LIMIT $2 OFFSET $3",
            SELECT_COLUMNS
        );
        let rows = self
            .fetch_many(
                sqlx::query(&sql)
                    .bind(buyer_id as i64)
                    .bind(i64::from(page.limit()))
                    .bind(page.offset() as i64),
            )
            .await?;
        let total = self
            .count(
                "SELECT COUNT(*) FROM purchases_tb WHERE buyer_id = $1",
                Some(buyer_id as i64),
            )
            .await?;
        Ok((rows, total))
    }

    async fn record_download(&self, id: PurchaseId) -> Result<Option<Purchase>, PurchaseError> {
        let result = sqlx::query(
            r#"
            UPDATE purchases_tb
            SET download_count = download_count + 1
            WHERE purchase_id = $1
              AND status = 'completed'
              AND (max_downloads <= 0 OR download_count < max_downloads)
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn buyer_stats(&self, buyer_id: UserId) -> Result<BuyerStats, PurchaseError> {
        let sql = format!(
            "SELECT COUNT(*) AS total_purchases, \
                    COUNT(*) FILTER (WHERE status IN {paid}) AS paid_purchases, \
                    COALESCE(SUM(price) FILTER (WHERE status IN {paid}), 0) AS total_spent \
             FROM purchases_tb WHERE buyer_id = $1",
            paid = PAID_STATUSES
        );
        let row = sqlx::query(&sql)
            .bind(buyer_id as i64)
            .fetch_one(&self.pool)
            .await?;

        Ok(BuyerStats {
            total_purchases: unsigned("total_purchases", row.try_get("total_purchases")?)?,
            paid_purchases: unsigned("paid_purchases", row.try_get("paid_purchases")?)?,
            total_spent: row.try_get("total_spent")?,
        })
    }

    async fn find_paid(
        &self,
        buyer_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<Purchase>, PurchaseError> {
        let sql = format!(
            "{} WHERE buyer_id = $1 AND product_id = $2 AND status IN {} \
             ORDER BY created_at DESC, purchase_id DESC LIMIT 1",
            SELECT_COLUMNS, PAID_STATUSES
        );
        let row = sqlx::query(&sql)
            .bind(buyer_id as i64)
            .bind(product_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_purchase).transpose()
    }
}
