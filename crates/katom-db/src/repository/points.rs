//! # Loyalty Points Repository
//!
//! Per-product point balances and their immutable transaction ledger.
//!
//! ## Mutations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  accrue   UPSERT balance (+n, lifetime +n)        → EARN     (+n)      │
//! │  deduct   UPDATE .. WHERE points >= n             → REDEEM   (−n)      │
//! │           0 rows → InsufficientPoints                                   │
//! │  redeem   deduct + point_redemptions row          → REDEEM   (−cost)   │
//! │  reverse  take min(n, balance)                    → REVERSAL (−taken)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every balance change is paired with a `point_transactions` row written on
//! the same connection.

use chrono::Utc;
use katom_core::loyalty::{
    reversible_points, PointHistoryPage, PointTransaction, PointTransactionKind, PointsContext,
    ProductPoints, RedeemResult, DEFAULT_HISTORY_PAGE_SIZE,
};
use katom_core::transfer::clamp_page_size;
use katom_core::validation::{validate_positive, validate_quantity};
use katom_core::{CoreError, Product};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::new_id;
use crate::error::DbResult;

const MAX_HISTORY_PAGE_SIZE: i64 = 100;

/// Repository for loyalty point balances.
#[derive(Debug, Clone)]
pub struct PointsRepository {
    pool: SqlitePool,
}

impl PointsRepository {
    /// Creates a new PointsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PointsRepository { pool }
    }

    /// Adds points in one transaction. Returns the new balance.
    pub async fn accrue(&self, ctx: &PointsContext, product_id: &str, points: i64) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let balance = accrue_in(&mut tx, ctx, product_id, points).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Spends points in one transaction. Returns what is left.
    ///
    /// ## Errors
    /// `InsufficientPoints` when the balance does not cover `points`.
    pub async fn deduct(&self, ctx: &PointsContext, product_id: &str, points: i64) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let remaining = deduct_in(&mut tx, ctx, product_id, points, None).await?;
        tx.commit().await?;
        Ok(remaining)
    }

    /// Takes back up to `points`, never below zero. Returns the amount taken.
    pub async fn reverse(&self, ctx: &PointsContext, product_id: &str, points: i64) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let taken = reverse_in(&mut tx, ctx, product_id, points).await?;
        tx.commit().await?;
        Ok(taken)
    }

    /// Exchanges points for units of a product.
    ///
    /// ## What This Does
    /// 1. `required = points_to_redeem × quantity`
    /// 2. Deducts with `WHERE points >= required` (first write)
    /// 3. Writes the REDEEM transaction and the redemption record
    ///
    /// ## Errors
    /// - `NotRedeemable` when the product has no redemption cost
    /// - `InsufficientPoints` when the balance is short
    /// - `StaffNotIdentified` when the context has no staff
    pub async fn redeem(
        &self,
        ctx: &PointsContext,
        product: &Product,
        quantity: i64,
    ) -> DbResult<RedeemResult> {
        validate_quantity(quantity)?;
        let staff_id = ctx
            .staff_id
            .clone()
            .ok_or(CoreError::StaffNotIdentified)?;
        let required = product.redeem_cost(quantity)?;

        let redemption_id = new_id();
        let ctx = ctx.clone().reference("point_redemptions", &redemption_id);

        let mut tx = self.pool.begin().await?;

        let remaining = deduct_in(
            &mut tx,
            &ctx,
            &product.id,
            required,
            Some(&format!("redeemed {quantity} x {}", product.name)),
        )
        .await?;

        sqlx::query(
            r#"
            INSERT INTO point_redemptions (
                id, store_id, branch_id, customer_id, product_id,
                quantity, points_used, staff_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&redemption_id)
        .bind(&ctx.store_id)
        .bind(&ctx.branch_id)
        .bind(&ctx.customer_id)
        .bind(&product.id)
        .bind(quantity)
        .bind(required)
        .bind(&staff_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            redemption_id = %redemption_id,
            customer_id = %ctx.customer_id,
            product_id = %product.id,
            points_used = required,
            "Points redeemed"
        );

        Ok(RedeemResult {
            redemption_id,
            points_used: required,
            remaining_points: remaining,
            product_name: product.name.clone(),
            quantity,
        })
    }

    /// Spendable points for one product. Zero when none were ever earned.
    pub async fn balance(&self, store_id: &str, customer_id: &str, product_id: &str) -> DbResult<i64> {
        let points: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT points FROM customer_product_points
            WHERE store_id = ?1 AND customer_id = ?2 AND product_id = ?3
            "#,
        )
        .bind(store_id)
        .bind(customer_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(points.unwrap_or(0))
    }

    /// Positive balances with the product they belong to.
    pub async fn balances(&self, store_id: &str, customer_id: &str) -> DbResult<Vec<ProductPoints>> {
        let balances = sqlx::query_as::<_, ProductPoints>(
            r#"
            SELECT
                cpp.product_id,
                p.name AS product_name,
                p.category,
                cpp.points,
                cpp.total_points,
                p.points_to_redeem,
                (p.points_to_redeem IS NOT NULL
                    AND p.points_to_redeem > 0
                    AND cpp.points >= p.points_to_redeem) AS can_redeem
            FROM customer_product_points cpp
            JOIN products p ON p.id = cpp.product_id
            WHERE cpp.store_id = ?1 AND cpp.customer_id = ?2 AND cpp.points > 0
            ORDER BY p.name
            "#,
        )
        .bind(store_id)
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(balances)
    }

    /// Point transactions, newest first. `page` starts at 1.
    pub async fn history(
        &self,
        store_id: &str,
        customer_id: &str,
        page: i64,
        limit: i64,
    ) -> DbResult<PointHistoryPage> {
        let page = page.max(1);
        let limit = clamp_page_size(Some(limit), DEFAULT_HISTORY_PAGE_SIZE, MAX_HISTORY_PAGE_SIZE);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM point_transactions WHERE store_id = ?1 AND customer_id = ?2",
        )
        .bind(store_id)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, PointTransaction>(
            r#"
            SELECT id, store_id, branch_id, customer_id, product_id, kind, points_change,
                   reference_table, reference_id, note, staff_id, created_at
            FROM point_transactions
            WHERE store_id = ?1 AND customer_id = ?2
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(store_id)
        .bind(customer_id)
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(PointHistoryPage {
            items,
            total,
            page,
            limit,
        })
    }
}

/// Adds points and writes an EARN transaction. Returns the new balance.
pub async fn accrue_in(
    conn: &mut SqliteConnection,
    ctx: &PointsContext,
    product_id: &str,
    points: i64,
) -> DbResult<i64> {
    validate_positive("points", points)?;

    let balance: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO customer_product_points (
            store_id, customer_id, product_id, points, total_points, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?4, ?5)
        ON CONFLICT (store_id, customer_id, product_id) DO UPDATE SET
            points = points + excluded.points,
            total_points = total_points + excluded.total_points,
            updated_at = excluded.updated_at
        RETURNING points
        "#,
    )
    .bind(&ctx.store_id)
    .bind(&ctx.customer_id)
    .bind(product_id)
    .bind(points)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    record_transaction_in(conn, ctx, product_id, PointTransactionKind::Earn, points, None).await?;

    debug!(customer_id = %ctx.customer_id, product_id = %product_id, points, balance, "Points accrued");
    Ok(balance)
}

/// Spends points and writes a REDEEM transaction. Returns what is left.
pub async fn deduct_in(
    conn: &mut SqliteConnection,
    ctx: &PointsContext,
    product_id: &str,
    points: i64,
    note: Option<&str>,
) -> DbResult<i64> {
    validate_positive("points", points)?;

    let remaining: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE customer_product_points SET points = points - ?4, updated_at = ?5
        WHERE store_id = ?1 AND customer_id = ?2 AND product_id = ?3 AND points >= ?4
        RETURNING points
        "#,
    )
    .bind(&ctx.store_id)
    .bind(&ctx.customer_id)
    .bind(product_id)
    .bind(points)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(remaining) = remaining else {
        let available: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT points FROM customer_product_points
            WHERE store_id = ?1 AND customer_id = ?2 AND product_id = ?3
            "#,
        )
        .bind(&ctx.store_id)
        .bind(&ctx.customer_id)
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;

        return Err(CoreError::InsufficientPoints {
            required: points,
            available: available.unwrap_or(0),
        }
        .into());
    };

    record_transaction_in(conn, ctx, product_id, PointTransactionKind::Redeem, -points, note)
        .await?;

    debug!(customer_id = %ctx.customer_id, product_id = %product_id, points, remaining, "Points deducted");
    Ok(remaining)
}

/// Takes back up to `wanted` points and writes a REVERSAL for what was taken.
pub async fn reverse_in(
    conn: &mut SqliteConnection,
    ctx: &PointsContext,
    product_id: &str,
    wanted: i64,
) -> DbResult<i64> {
    let now = Utc::now();

    // Touch first so the balance is read under the write lock
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE customer_product_points SET updated_at = ?4
        WHERE store_id = ?1 AND customer_id = ?2 AND product_id = ?3
        RETURNING points
        "#,
    )
    .bind(&ctx.store_id)
    .bind(&ctx.customer_id)
    .bind(product_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let taken = reversible_points(wanted, balance.unwrap_or(0));
    if taken == 0 {
        debug!(customer_id = %ctx.customer_id, product_id = %product_id, wanted, "Nothing to reverse");
        return Ok(0);
    }

    sqlx::query(
        r#"
        UPDATE customer_product_points SET points = points - ?4
        WHERE store_id = ?1 AND customer_id = ?2 AND product_id = ?3
        "#,
    )
    .bind(&ctx.store_id)
    .bind(&ctx.customer_id)
    .bind(product_id)
    .bind(taken)
    .execute(&mut *conn)
    .await?;

    record_transaction_in(
        conn,
        ctx,
        product_id,
        PointTransactionKind::Reversal,
        -taken,
        Some("order cancelled"),
    )
    .await?;

    debug!(customer_id = %ctx.customer_id, product_id = %product_id, wanted, taken, "Points reversed");
    Ok(taken)
}

async fn record_transaction_in(
    conn: &mut SqliteConnection,
    ctx: &PointsContext,
    product_id: &str,
    kind: PointTransactionKind,
    points_change: i64,
    note: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO point_transactions (
            id, store_id, branch_id, customer_id, product_id, kind, points_change,
            reference_table, reference_id, note, staff_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(new_id())
    .bind(&ctx.store_id)
    .bind(&ctx.branch_id)
    .bind(&ctx.customer_id)
    .bind(product_id)
    .bind(kind)
    .bind(points_change)
    .bind(&ctx.reference_table)
    .bind(&ctx.reference_id)
    .bind(note)
    .bind(&ctx.staff_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, Fixture};
    use crate::DbError;

    fn ctx(fx: &Fixture) -> PointsContext {
        PointsContext::new(&fx.store_id, &fx.branch_id, &fx.customer_id).staff(&fx.staff_id)
    }

    async fn mango(fx: &Fixture) -> Product {
        fx.db
            .catalog()
            .product(&fx.store_id, &fx.product_ids[2])
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_accrue_tracks_balance_and_lifetime() {
        let fx = fixture().await;
        let points = fx.db.points();
        let product = &fx.product_ids[2];

        assert_eq!(points.accrue(&ctx(&fx), product, 4).await.unwrap(), 4);
        assert_eq!(points.accrue(&ctx(&fx), product, 3).await.unwrap(), 7);
        points.deduct(&ctx(&fx), product, 5).await.unwrap();

        let balances = points.balances(&fx.store_id, &fx.customer_id).await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].points, 2);
        assert_eq!(balances[0].total_points, 7);
        assert!(!balances[0].can_redeem);
    }

    #[tokio::test]
    async fn test_deduct_insufficient_reports_available() {
        let fx = fixture().await;
        let points = fx.db.points();
        points.accrue(&ctx(&fx), &fx.product_ids[2], 3).await.unwrap();

        let result = points.deduct(&ctx(&fx), &fx.product_ids[2], 5).await;

        assert!(matches!(
            result,
            Err(DbError::Domain(CoreError::InsufficientPoints { required: 5, available: 3 }))
        ));
        assert_eq!(
            points.balance(&fx.store_id, &fx.customer_id, &fx.product_ids[2]).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_redeem_writes_redemption_and_ledger() {
        let fx = fixture().await;
        let points = fx.db.points();
        let product = mango(&fx).await;
        points.accrue(&ctx(&fx), &product.id, 12).await.unwrap();

        let result = points.redeem(&ctx(&fx), &product, 2).await.unwrap();

        assert_eq!(result.points_used, 10);
        assert_eq!(result.remaining_points, 2);
        assert_eq!(result.product_name, "Mango");

        let history = points.history(&fx.store_id, &fx.customer_id, 1, 20).await.unwrap();
        assert_eq!(history.total, 2);
        assert_eq!(history.items[0].kind, PointTransactionKind::Redeem);
        assert_eq!(history.items[0].points_change, -10);
        assert_eq!(
            history.items[0].reference_id.as_deref(),
            Some(result.redemption_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_redeem_rejects_unredeemable_product() {
        let fx = fixture().await;
        let tea = fx
            .db
            .catalog()
            .product(&fx.store_id, &fx.product_ids[0])
            .await
            .unwrap()
            .unwrap();

        let result = fx.db.points().redeem(&ctx(&fx), &tea, 1).await;
        assert!(matches!(result, Err(DbError::Domain(CoreError::Validation(_)))));
    }

    #[tokio::test]
    async fn test_redeem_requires_staff() {
        let fx = fixture().await;
        let product = mango(&fx).await;
        let anonymous = PointsContext::new(&fx.store_id, &fx.branch_id, &fx.customer_id);

        let result = fx.db.points().redeem(&anonymous, &product, 1).await;
        assert!(matches!(result, Err(DbError::Domain(CoreError::StaffNotIdentified))));
    }

    #[tokio::test]
    async fn test_reverse_is_clamped_to_balance() {
        let fx = fixture().await;
        let points = fx.db.points();
        let product = &fx.product_ids[2];
        points.accrue(&ctx(&fx), product, 3).await.unwrap();

        assert_eq!(points.reverse(&ctx(&fx), product, 5).await.unwrap(), 3);
        assert_eq!(points.reverse(&ctx(&fx), product, 5).await.unwrap(), 0);
        assert_eq!(points.balance(&fx.store_id, &fx.customer_id, product).await.unwrap(), 0);

        let history = points.history(&fx.store_id, &fx.customer_id, 1, 20).await.unwrap();
        // EARN + one REVERSAL; the empty reversal writes nothing
        assert_eq!(history.total, 2);
    }

    #[tokio::test]
    async fn test_history_paging() {
        let fx = fixture().await;
        let points = fx.db.points();
        for _ in 0..5 {
            points.accrue(&ctx(&fx), &fx.product_ids[2], 1).await.unwrap();
        }

        let page = points.history(&fx.store_id, &fx.customer_id, 2, 2).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.page, 2);

        let last = points.history(&fx.store_id, &fx.customer_id, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
    }
}
