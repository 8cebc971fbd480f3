//! # Stock Ledger Repository
//!
//! Per-branch stock levels and the append-only movement log.
//!
//! ## Adjust Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  adjust_in(conn, adjustment)                            │
//! │                                                                         │
//! │  1. INSERT INTO stock_levels (.., on_hand = 0)                         │
//! │     ON CONFLICT DO NOTHING          ← first write: takes the lock      │
//! │                                                                         │
//! │  2. SELECT on_hand                  ← before                           │
//! │                                                                         │
//! │  3. after = clamp_on_hand(before, delta)   (never below zero)          │
//! │                                                                         │
//! │  4. UPDATE stock_levels SET on_hand = after                            │
//! │                                                                         │
//! │  5. INSERT INTO stock_movements                                        │
//! │       quantity_change  = after − before                                │
//! │       requested_change = delta                                         │
//! │                                                                         │
//! │  Invariant: on_hand == Σ quantity_change for the (branch, product)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Orders, shift close and transfers call [`adjust_in`] inside their own
//! transaction. [`StockRepository::adjust`] wraps it in a transaction of its
//! own for standalone corrections.

use chrono::Utc;
use katom_core::validation::{validate_non_negative, validate_required};
use katom_core::{clamp_on_hand, StockAdjustment, StockChange, StockLevel, StockMovement};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::new_id;
use crate::error::{DbError, DbResult};

/// Repository for stock levels and movements.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Applies one adjustment in its own transaction.
    ///
    /// ## Returns
    /// The movement id with the before/after snapshot.
    pub async fn adjust(&self, adjustment: &StockAdjustment) -> DbResult<StockChange> {
        validate_required("store_id", &adjustment.store_id)?;
        validate_required("branch_id", &adjustment.branch_id)?;
        validate_required("product_id", &adjustment.product_id)?;
        validate_required("actor_id", &adjustment.actor_id)?;

        let mut tx = self.pool.begin().await?;
        let change = adjust_in(&mut tx, adjustment).await?;
        tx.commit().await?;

        Ok(change)
    }

    /// Gets the level row, if the pair was ever provisioned.
    pub async fn level(&self, branch_id: &str, product_id: &str) -> DbResult<Option<StockLevel>> {
        let level = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT store_id, branch_id, product_id, on_hand, reorder_level, updated_at
            FROM stock_levels
            WHERE branch_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Current on-hand quantity. Zero when never provisioned.
    pub async fn on_hand(&self, branch_id: &str, product_id: &str) -> DbResult<i64> {
        Ok(self
            .level(branch_id, product_id)
            .await?
            .map(|l| l.on_hand)
            .unwrap_or(0))
    }

    /// Movements for one (branch, product), newest first.
    pub async fn movements(
        &self,
        branch_id: &str,
        product_id: &str,
        limit: i64,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, store_id, branch_id, product_id, kind,
                   quantity_change, requested_change, from_stock, to_stock,
                   reason, actor_id, reference_table, reference_id, created_at
            FROM stock_movements
            WHERE branch_id = ?1 AND product_id = ?2
            ORDER BY rowid DESC
            LIMIT ?3
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Movements written on behalf of one order or transfer, oldest first.
    pub async fn movements_for_reference(
        &self,
        reference_table: &str,
        reference_id: &str,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, store_id, branch_id, product_id, kind,
                   quantity_change, requested_change, from_stock, to_stock,
                   reason, actor_id, reference_table, reference_id, created_at
            FROM stock_movements
            WHERE reference_table = ?1 AND reference_id = ?2
            ORDER BY rowid
            "#,
        )
        .bind(reference_table)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Σ quantity_change for the pair. Equals on_hand when the ledger is consistent.
    pub async fn movement_total(&self, branch_id: &str, product_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity_change), 0)
            FROM stock_movements
            WHERE branch_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    /// Sets the reorder threshold of an existing level.
    pub async fn set_reorder_level(
        &self,
        branch_id: &str,
        product_id: &str,
        reorder_level: i64,
    ) -> DbResult<()> {
        validate_non_negative("reorder_level", reorder_level)?;

        let result = sqlx::query(
            r#"
            UPDATE stock_levels SET reorder_level = ?3, updated_at = ?4
            WHERE branch_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(reorder_level)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(
                "StockLevel",
                format!("{branch_id}/{product_id}"),
            ));
        }

        Ok(())
    }
}

/// Applies one adjustment on an open connection or transaction.
///
/// The provisioning insert is the first statement so the caller's
/// transaction holds the write lock before `before` is read.
pub async fn adjust_in(
    conn: &mut SqliteConnection,
    adjustment: &StockAdjustment,
) -> DbResult<StockChange> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO stock_levels (store_id, branch_id, product_id, on_hand, reorder_level, updated_at)
        VALUES (?1, ?2, ?3, 0, 0, ?4)
        ON CONFLICT (branch_id, product_id) DO NOTHING
        "#,
    )
    .bind(&adjustment.store_id)
    .bind(&adjustment.branch_id)
    .bind(&adjustment.product_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let before: i64 = sqlx::query_scalar(
        "SELECT on_hand FROM stock_levels WHERE branch_id = ?1 AND product_id = ?2",
    )
    .bind(&adjustment.branch_id)
    .bind(&adjustment.product_id)
    .fetch_one(&mut *conn)
    .await?;

    let after = clamp_on_hand(before, adjustment.delta);

    sqlx::query(
        r#"
        UPDATE stock_levels SET on_hand = ?3, updated_at = ?4
        WHERE branch_id = ?1 AND product_id = ?2
        "#,
    )
    .bind(&adjustment.branch_id)
    .bind(&adjustment.product_id)
    .bind(after)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let movement_id = new_id();
    let (reference_table, reference_id) = match &adjustment.reference {
        Some(r) => (Some(r.table.as_str()), Some(r.id.as_str())),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, store_id, branch_id, product_id, kind,
            quantity_change, requested_change, from_stock, to_stock,
            reason, actor_id, reference_table, reference_id, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14
        )
        "#,
    )
    .bind(&movement_id)
    .bind(&adjustment.store_id)
    .bind(&adjustment.branch_id)
    .bind(&adjustment.product_id)
    .bind(adjustment.kind)
    .bind(after - before)
    .bind(adjustment.delta)
    .bind(before)
    .bind(after)
    .bind(&adjustment.reason)
    .bind(&adjustment.actor_id)
    .bind(reference_table)
    .bind(reference_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let change = StockChange {
        movement_id,
        before,
        after,
    };

    if change.was_clamped(adjustment.delta) {
        warn!(
            branch_id = %adjustment.branch_id,
            product_id = %adjustment.product_id,
            requested = adjustment.delta,
            applied = change.applied(),
            "Stock adjustment clamped at zero"
        );
    } else {
        debug!(
            branch_id = %adjustment.branch_id,
            product_id = %adjustment.product_id,
            kind = %adjustment.kind,
            before,
            after,
            "Stock adjusted"
        );
    }

    Ok(change)
}

// =============================================================================
// Unit Tests
// =============================================================================
