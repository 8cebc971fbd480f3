//! # Points Accrual Outbox
//!
//! Loyalty side effects of orders, queued in the order's own transaction and
//! applied later by the accrual worker.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  ORDER TRANSACTION (create_order_tx / cancel_order)                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  stock deductions, items, payments, change cash ...             │   │
//! │  │  INSERT INTO points_accrual_queue (kind, order_id, payload)     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← the job exists iff the order does                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            ACCRUAL WORKER (katom-server)                        │   │
//! │  │                                                                 │   │
//! │  │  1. pending(batch, max_attempts)                                │   │
//! │  │  2. apply(job), one loyalty transaction:                        │   │
//! │  │     a. UPDATE queue SET processed_at WHERE processed_at IS NULL │   │
//! │  │        (0 rows → someone else applied it, skip)                 │   │
//! │  │     b. EARN or REVERSAL per product                             │   │
//! │  │  3. On failure: mark_failed → attempts += 1, last_error         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  A loyalty failure never rolls back or fails the order.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use katom_core::loyalty::{
    encode_lines, points_per_product, AccrualJob, AccrualKind, AccrualLine, PointsContext,
};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::new_id;
use super::points::{accrue_in, reverse_in};
use crate::error::DbResult;

const JOB_COLUMNS: &str = r#"
    id, kind, store_id, branch_id, order_id, customer_id, staff_id, payload,
    attempts, last_error, created_at, attempted_at, processed_at
"#;

/// A job to queue alongside an order change.
#[derive(Debug, Clone)]
pub struct NewAccrualJob {
    pub kind: AccrualKind,
    pub store_id: String,
    pub branch_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub staff_id: String,
    pub lines: Vec<AccrualLine>,
}

/// Repository for the points accrual queue.
#[derive(Debug, Clone)]
pub struct AccrualRepository {
    pool: SqlitePool,
}

impl AccrualRepository {
    /// Creates a new AccrualRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccrualRepository { pool }
    }

    /// Unprocessed jobs below the attempt limit, oldest first.
    pub async fn pending(&self, batch_size: i64, max_attempts: i64) -> DbResult<Vec<AccrualJob>> {
        let jobs = sqlx::query_as::<_, AccrualJob>(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM points_accrual_queue
            WHERE processed_at IS NULL AND attempts < ?1
            ORDER BY created_at, rowid
            LIMIT ?2
            "#
        ))
        .bind(max_attempts)
        .bind(batch_size.max(1))
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Applies one job to the points ledger.
    ///
    /// ## Returns
    /// * `Ok(true)` - Job applied and marked processed
    /// * `Ok(false)` - Job was already processed (nothing written)
    pub async fn apply(&self, job: &AccrualJob) -> DbResult<bool> {
        let lines = job.lines()?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE points_accrual_queue
            SET processed_at = ?2, attempted_at = ?2, attempts = attempts + 1
            WHERE id = ?1 AND processed_at IS NULL
            "#,
        )
        .bind(&job.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            debug!(job_id = %job.id, "Accrual job already processed");
            return Ok(false);
        }

        let ctx = PointsContext::new(&job.store_id, &job.branch_id, &job.customer_id)
            .staff(&job.staff_id)
            .reference("orders", &job.order_id);

        let mut points_total = 0;
        for (product_id, points) in points_per_product(&lines) {
            points_total += match job.kind {
                AccrualKind::Accrue => {
                    accrue_in(&mut tx, &ctx, &product_id, points).await?;
                    points
                }
                AccrualKind::Reverse => reverse_in(&mut tx, &ctx, &product_id, points).await?,
            };
        }

        tx.commit().await?;

        info!(
            job_id = %job.id,
            order_id = %job.order_id,
            kind = ?job.kind,
            points = points_total,
            "Accrual job applied"
        );
        Ok(true)
    }

    /// Records a failed attempt.
    pub async fn mark_failed(&self, job_id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE points_accrual_queue
            SET attempts = attempts + 1, last_error = ?2, attempted_at = ?3
            WHERE id = ?1 AND processed_at IS NULL
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Jobs that ran out of attempts and need a person to look at them.
    pub async fn dead_letter_count(&self, max_attempts: i64) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM points_accrual_queue WHERE processed_at IS NULL AND attempts >= ?1",
        )
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM points_accrual_queue WHERE processed_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// All jobs queued for an order, oldest first.
    pub async fn for_order(&self, order_id: &str) -> DbResult<Vec<AccrualJob>> {
        let jobs = sqlx::query_as::<_, AccrualJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM points_accrual_queue WHERE order_id = ?1 ORDER BY rowid"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}

/// Queues a job on the caller's transaction.
pub async fn enqueue_in(conn: &mut SqliteConnection, job: &NewAccrualJob) -> DbResult<String> {
    let id = new_id();
    let payload = encode_lines(&job.lines)?;

    sqlx::query(
        r#"
        INSERT INTO points_accrual_queue (
            id, kind, store_id, branch_id, order_id, customer_id, staff_id,
            payload, attempts, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
        "#,
    )
    .bind(&id)
    .bind(job.kind)
    .bind(&job.store_id)
    .bind(&job.branch_id)
    .bind(&job.order_id)
    .bind(&job.customer_id)
    .bind(&job.staff_id)
    .bind(payload)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(job_id = %id, order_id = %job.order_id, kind = ?job.kind, "Accrual job queued");
    Ok(id)
}

/// Retires an order's ACCRUE job that has not run yet.
///
/// Returns the number of jobs retired. When it is non-zero the points were
/// never earned, so no reversal is needed.
pub async fn retire_pending_accrual_in(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE points_accrual_queue
        SET processed_at = ?2, last_error = 'order cancelled before accrual'
        WHERE order_id = ?1 AND kind = 'ACCRUE' AND processed_at IS NULL
        "#,
    )
    .bind(order_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture;

    #[tokio::test]
    async fn test_order_with_customer_queues_accrue_job() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[1], 10).await;
        fx.open_shift(0).await;

        let receipt = fx.place(&fx.cash_order(&[(1, 2), (1, 1)], 7_500, true)).await;

        let jobs = fx.db.accrual().for_order(&receipt.order.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, AccrualKind::Accrue);
        assert!(jobs[0].processed_at.is_none());
        assert_eq!(jobs[0].lines().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_walk_in_order_queues_nothing() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[1], 10).await;
        fx.open_shift(0).await;

        let receipt = fx.place(&fx.cash_order(&[(1, 1)], 2_500, false)).await;

        assert!(fx.db.accrual().for_order(&receipt.order.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_earns_points_once() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[1], 10).await;
        fx.open_shift(0).await;
        fx.place(&fx.cash_order(&[(1, 2), (1, 1)], 7_500, true)).await;

        let accrual = fx.db.accrual();
        let jobs = accrual.pending(10, 5).await.unwrap();
        assert_eq!(jobs.len(), 1);

        assert!(accrual.apply(&jobs[0]).await.unwrap());
        assert!(!accrual.apply(&jobs[0]).await.unwrap());

        let points = fx
            .db
            .points()
            .balance(&fx.store_id, &fx.customer_id, &fx.product_ids[1])
            .await
            .unwrap();
        assert_eq!(points, 3);
        assert_eq!(accrual.pending_count().await.unwrap(), 0);

        let history = fx
            .db
            .points()
            .history(&fx.store_id, &fx.customer_id, 1, 20)
            .await
            .unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].points_change, 3);
    }

    #[tokio::test]
    async fn test_failed_jobs_become_dead_letters() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[1], 10).await;
        fx.open_shift(0).await;
        fx.place(&fx.cash_order(&[(1, 1)], 2_500, true)).await;

        let accrual = fx.db.accrual();
        let job = accrual.pending(10, 2).await.unwrap().remove(0);

        accrual.mark_failed(&job.id, "boom").await.unwrap();
        assert_eq!(accrual.pending(10, 2).await.unwrap().len(), 1);

        accrual.mark_failed(&job.id, "boom again").await.unwrap();
        assert!(accrual.pending(10, 2).await.unwrap().is_empty());
        assert_eq!(accrual.dead_letter_count(2).await.unwrap(), 1);

        let stored = accrual.for_order(&job.order_id).await.unwrap().remove(0);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_not_applied() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[1], 10).await;
        fx.open_shift(0).await;
        fx.place(&fx.cash_order(&[(1, 1)], 2_500, true)).await;

        let accrual = fx.db.accrual();
        let mut job = accrual.pending(10, 5).await.unwrap().remove(0);
        job.payload = "{".into();

        assert!(accrual.apply(&job).await.is_err());
        assert_eq!(accrual.pending_count().await.unwrap(), 1);
    }
}
