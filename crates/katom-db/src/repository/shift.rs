//! # Shift Repository
//!
//! Opens and closes cashier shifts and reads drawer totals from order history.
//!
//! ## Shift Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Shift Lifecycle                                   │
//! │                                                                         │
//! │  1. OPEN                                                               │
//! │     └── INSERT shifts (is_active = 1)                                  │
//! │         partial unique index: one active shift per branch              │
//! │     └── branches.is_shift_opened = 1                                   │
//! │                                                                         │
//! │  2. SELL                                                               │
//! │     └── orders.shift_id = this shift                                   │
//! │     └── change handed back → shift_cash_movements PAID_OUT/OUT         │
//! │                                                                         │
//! │  3. CLOSE                                                              │
//! │     └── UPDATE shifts .. WHERE is_active = 1 RETURNING id  (lock)      │
//! │     └── totals → expected cash → variance                              │
//! │     └── is_active = 0, branch flag cleared                             │
//! │     └── optional stock count session (audit only)                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use katom_core::shift::{
    CashDirection, CashMovementKind, CloseShiftRequest, CloseShiftResult, ShiftCashMovement,
    ShiftSummary, ShiftTotals, StockCountLine,
};
use katom_core::validation::validate_non_negative;
use katom_core::{CoreError, Money, Shift};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use super::new_id;
use crate::error::{DbError, DbResult};

const SHIFT_COLUMNS: &str = r#"
    id, store_id, branch_id, starting_cash_cents, ending_cash_cents,
    expected_cash_cents, variance_cents, close_note, opened_by, closed_by,
    started_at, ended_at, is_active, updated_at
"#;

/// Repository for shift database operations.
#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    /// Creates a new ShiftRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    /// Opens a shift for the branch.
    ///
    /// ## Errors
    /// - `ShiftAlreadyOpen` when the branch has an active shift (branch untouched)
    /// - `BranchNotFound` when the branch is not in the store
    pub async fn open(
        &self,
        store_id: &str,
        branch_id: &str,
        staff_id: &str,
        starting_cash_cents: i64,
    ) -> DbResult<Shift> {
        validate_non_negative("starting_cash", starting_cash_cents)?;

        let now = Utc::now();
        let shift = Shift {
            id: new_id(),
            store_id: store_id.to_string(),
            branch_id: branch_id.to_string(),
            starting_cash_cents,
            ending_cash_cents: None,
            expected_cash_cents: None,
            variance_cents: None,
            close_note: None,
            opened_by: staff_id.to_string(),
            closed_by: None,
            started_at: now,
            ended_at: None,
            is_active: true,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO shifts (
                id, store_id, branch_id, starting_cash_cents,
                opened_by, started_at, is_active, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?6)
            "#,
        )
        .bind(&shift.id)
        .bind(&shift.store_id)
        .bind(&shift.branch_id)
        .bind(shift.starting_cash_cents)
        .bind(&shift.opened_by)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from);

        match inserted {
            Err(err) if err.is_unique_violation_on("shifts.branch_id") => {
                return Err(CoreError::ShiftAlreadyOpen {
                    branch_id: branch_id.to_string(),
                }
                .into());
            }
            Err(DbError::ForeignKeyViolation { .. }) => {
                return Err(CoreError::BranchNotFound(branch_id.to_string()).into());
            }
            other => {
                other?;
            }
        }

        let flagged = sqlx::query(
            r#"
            UPDATE branches SET is_shift_opened = 1, shift_opened_at = ?3
            WHERE id = ?1 AND store_id = ?2
            "#,
        )
        .bind(branch_id)
        .bind(store_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if flagged.rows_affected() == 0 {
            return Err(CoreError::BranchNotFound(branch_id.to_string()).into());
        }

        tx.commit().await?;

        info!(shift_id = %shift.id, branch_id = %branch_id, starting_cash = %shift.starting_cash(), "Shift opened");
        Ok(shift)
    }

    /// The branch's active shift, if any.
    pub async fn active(&self, store_id: &str, branch_id: &str) -> DbResult<Option<Shift>> {
        let shift = sqlx::query_as::<_, Shift>(&format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts WHERE store_id = ?1 AND branch_id = ?2 AND is_active = 1"
        ))
        .bind(store_id)
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(shift)
    }

    pub async fn get(&self, store_id: &str, shift_id: &str) -> DbResult<Option<Shift>> {
        let shift = sqlx::query_as::<_, Shift>(&format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = ?1 AND store_id = ?2"
        ))
        .bind(shift_id)
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(shift)
    }

    /// Drawer figures for the branch's active shift.
    ///
    /// ## Errors
    /// `NoActiveShift` when the branch has no open shift.
    pub async fn summary(&self, store_id: &str, branch_id: &str) -> DbResult<ShiftSummary> {
        let shift = self
            .active(store_id, branch_id)
            .await?
            .ok_or_else(|| CoreError::NoActiveShift {
                branch_id: branch_id.to_string(),
            })?;

        let mut conn = self.pool.acquire().await?;
        let totals = totals_in(&mut conn, &shift).await?;

        Ok(ShiftSummary::new(&shift.id, &totals))
    }

    /// Closes the branch's active shift and reconciles the drawer.
    ///
    /// ## What This Does
    /// 1. Claims the active shift with a conditional update (first write)
    /// 2. Recomputes totals from PAID orders of the shift
    /// 3. Persists ending/expected cash, variance and note
    /// 4. Clears the branch flag
    /// 5. Writes the stock count session when counts are supplied
    ///
    /// ## Errors
    /// `NoActiveShift` when nothing is open, including when a concurrent
    /// close got there first.
    pub async fn close(
        &self,
        store_id: &str,
        branch_id: &str,
        staff_id: &str,
        request: &CloseShiftRequest,
    ) -> DbResult<CloseShiftResult> {
        request.validate()?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE shifts SET updated_at = ?3
            WHERE store_id = ?1 AND branch_id = ?2 AND is_active = 1
            RETURNING id
            "#,
        )
        .bind(store_id)
        .bind(branch_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let shift_id = claimed.ok_or_else(|| CoreError::NoActiveShift {
            branch_id: branch_id.to_string(),
        })?;

        let shift = sqlx::query_as::<_, Shift>(&format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = ?1"
        ))
        .bind(&shift_id)
        .fetch_one(&mut *tx)
        .await?;

        let totals = totals_in(&mut tx, &shift).await?;
        let actual = Money::from_cents(request.actual_cash_cents);
        let expected = totals.expected_cash();
        let variance = totals.variance(actual);

        sqlx::query(
            r#"
            UPDATE shifts SET
                ending_cash_cents = ?2,
                expected_cash_cents = ?3,
                variance_cents = ?4,
                close_note = ?5,
                closed_by = ?6,
                ended_at = ?7,
                is_active = 0,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&shift_id)
        .bind(actual.cents())
        .bind(expected.cents())
        .bind(variance.cents())
        .bind(&request.note)
        .bind(staff_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE branches SET is_shift_opened = 0, shift_closed_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(branch_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let (session_id, lines) = if request.stock_counts.is_empty() {
            (None, Vec::new())
        } else {
            let (id, lines) =
                record_stock_count_in(&mut tx, &shift, staff_id, request).await?;
            (Some(id), lines)
        };

        let closed = sqlx::query_as::<_, Shift>(&format!(
            "SELECT {SHIFT_COLUMNS} FROM shifts WHERE id = ?1"
        ))
        .bind(&shift_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            shift_id = %shift_id,
            branch_id = %branch_id,
            expected = %expected,
            actual = %actual,
            variance = %variance,
            "Shift closed"
        );

        Ok(CloseShiftResult {
            shift: closed,
            summary: ShiftSummary::new(&shift_id, &totals),
            variance,
            stock_count_session_id: session_id,
            stock_count_lines: lines,
        })
    }

    /// Drawer movements of a shift, oldest first.
    pub async fn cash_movements(&self, shift_id: &str) -> DbResult<Vec<ShiftCashMovement>> {
        let movements = sqlx::query_as::<_, ShiftCashMovement>(
            r#"
            SELECT id, shift_id, kind, direction, amount_cents, note, created_by, created_at
            FROM shift_cash_movements
            WHERE shift_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    pub async fn stock_count_lines(&self, session_id: &str) -> DbResult<Vec<StockCountLine>> {
        let lines = sqlx::query_as::<_, StockCountLine>(
            r#"
            SELECT id, session_id, product_id, expected_count, actual_count, difference
            FROM stock_count_lines
            WHERE session_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }
}

/// Aggregates a shift's orders. Cash and sales count PAID orders only.
pub async fn totals_in(conn: &mut SqliteConnection, shift: &Shift) -> DbResult<ShiftTotals> {
    let (cash_payments, cash_change, total_sales, order_count, cancelled_total, cancelled_count): (
        i64,
        i64,
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        r#"
        SELECT
            COALESCE((
                SELECT SUM(p.amount_cents)
                FROM payments p JOIN orders o ON o.id = p.order_id
                WHERE o.shift_id = ?1 AND o.status = 'PAID' AND p.method = 'CASH'
            ), 0),
            COALESCE((
                SELECT SUM(o.change_amount_cents)
                FROM orders o
                WHERE o.shift_id = ?1 AND o.status = 'PAID'
                  AND EXISTS (
                      SELECT 1 FROM payments p
                      WHERE p.order_id = o.id AND p.method = 'CASH'
                  )
            ), 0),
            COALESCE((
                SELECT SUM(total_price_cents) FROM orders
                WHERE shift_id = ?1 AND status = 'PAID'
            ), 0),
            (SELECT COUNT(*) FROM orders WHERE shift_id = ?1 AND status = 'PAID'),
            COALESCE((
                SELECT SUM(total_price_cents) FROM orders
                WHERE shift_id = ?1 AND status = 'CANCELLED'
            ), 0),
            (SELECT COUNT(*) FROM orders WHERE shift_id = ?1 AND status = 'CANCELLED')
        "#,
    )
    .bind(&shift.id)
    .fetch_one(&mut *conn)
    .await?;

    let totals = ShiftTotals {
        starting_cash: shift.starting_cash(),
        cash_payments: Money::from_cents(cash_payments),
        cash_change: Money::from_cents(cash_change),
        total_sales: Money::from_cents(total_sales),
        order_count,
        cancelled_total: Money::from_cents(cancelled_total),
        cancelled_count,
    };

    debug!(shift_id = %shift.id, expected = %totals.expected_cash(), "Shift totals computed");
    Ok(totals)
}

/// Appends a drawer movement to a shift.
pub async fn record_cash_movement_in(
    conn: &mut SqliteConnection,
    shift_id: &str,
    kind: CashMovementKind,
    direction: CashDirection,
    amount_cents: i64,
    note: Option<&str>,
    created_by: &str,
) -> DbResult<String> {
    let id = new_id();

    sqlx::query(
        r#"
        INSERT INTO shift_cash_movements (
            id, shift_id, kind, direction, amount_cents, note, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&id)
    .bind(shift_id)
    .bind(kind)
    .bind(direction)
    .bind(amount_cents)
    .bind(note)
    .bind(created_by)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(shift_id = %shift_id, amount_cents, "Cash movement recorded");
    Ok(id)
}

/// Writes a count session with one line per product. The ledger is not touched.
async fn record_stock_count_in(
    conn: &mut SqliteConnection,
    shift: &Shift,
    staff_id: &str,
    request: &CloseShiftRequest,
) -> DbResult<(String, Vec<StockCountLine>)> {
    let session_id = new_id();

    sqlx::query(
        r#"
        INSERT INTO stock_count_sessions (id, store_id, branch_id, shift_id, counted_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&session_id)
    .bind(&shift.store_id)
    .bind(&shift.branch_id)
    .bind(&shift.id)
    .bind(staff_id)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let mut lines = Vec::with_capacity(request.stock_counts.len());
    for entry in &request.stock_counts {
        let known: Option<String> =
            sqlx::query_scalar("SELECT id FROM products WHERE id = ?1 AND store_id = ?2")
                .bind(&entry.product_id)
                .bind(&shift.store_id)
                .fetch_optional(&mut *conn)
                .await?;
        if known.is_none() {
            return Err(CoreError::ProductNotFound(entry.product_id.clone()).into());
        }

        let expected: i64 = sqlx::query_scalar(
            "SELECT on_hand FROM stock_levels WHERE branch_id = ?1 AND product_id = ?2",
        )
        .bind(&shift.branch_id)
        .bind(&entry.product_id)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or(0);

        let line = StockCountLine {
            id: new_id(),
            session_id: session_id.clone(),
            product_id: entry.product_id.clone(),
            expected_count: expected,
            actual_count: entry.actual_count,
            difference: entry.actual_count - expected,
        };

        sqlx::query(
            r#"
            INSERT INTO stock_count_lines (
                id, session_id, product_id, expected_count, actual_count, difference
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&line.id)
        .bind(&line.session_id)
        .bind(&line.product_id)
        .bind(line.expected_count)
        .bind(line.actual_count)
        .bind(line.difference)
        .execute(&mut *conn)
        .await?;

        lines.push(line);
    }

    debug!(session_id = %session_id, lines = lines.len(), "Stock count recorded");
    Ok((session_id, lines))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, fixture_with, Fixture};
    use crate::DbConfig;
    use katom_core::shift::StockCountEntry;
    use std::path::PathBuf;

    fn close_request(actual_cash_cents: i64) -> CloseShiftRequest {
        CloseShiftRequest {
            actual_cash_cents,
            note: None,
            stock_counts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_open_sets_branch_flag() {
        let fx = fixture().await;
        let shift = fx.open_shift(100_000).await;

        assert!(shift.is_active);
        let branch = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert!(branch.is_shift_opened);
        assert!(branch.shift_opened_at.is_some());

        let active = fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap();
        assert_eq!(active.unwrap().id, shift.id);
    }

    #[tokio::test]
    async fn test_second_open_fails_and_leaves_branch_unchanged() {
        let fx = fixture().await;
        let first = fx.open_shift(100_000).await;
        let before = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();

        let second = fx
            .db
            .shifts()
            .open(&fx.store_id, &fx.branch_id, &fx.staff_id, 50_000)
            .await;

        assert!(matches!(
            second,
            Err(DbError::Domain(CoreError::ShiftAlreadyOpen { .. }))
        ));
        let after = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert_eq!(before.shift_opened_at, after.shift_opened_at);
        let active = fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn test_open_unknown_branch() {
        let fx = fixture().await;
        let result = fx.db.shifts().open(&fx.store_id, "missing", &fx.staff_id, 0).await;
        assert!(matches!(result, Err(DbError::Domain(CoreError::BranchNotFound(_)))));
    }

    #[tokio::test]
    async fn test_open_rejects_negative_cash() {
        let fx = fixture().await;
        let result = fx.db.shifts().open(&fx.store_id, &fx.branch_id, &fx.staff_id, -1).await;
        assert!(matches!(result, Err(DbError::Domain(CoreError::Validation(_)))));
    }

    #[tokio::test]
    async fn test_close_at_expected_has_zero_variance() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[2], 10).await;
        fx.open_shift(100_000).await;

        // 50.00 paid with 60.00 cash: 10.00 change
        fx.place(&fx.cash_order(&[(2, 1)], 6_000, false)).await;

        let summary = fx.db.shifts().summary(&fx.store_id, &fx.branch_id).await.unwrap();
        assert_eq!(summary.cash_payments.cents(), 6_000);
        assert_eq!(summary.cash_change.cents(), 1_000);
        assert_eq!(summary.expected_cash.cents(), 105_000);
        assert_eq!(summary.order_count, 1);

        let result = fx
            .db
            .shifts()
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &close_request(105_000))
            .await
            .unwrap();

        assert!(result.variance.is_zero());
        assert!(!result.shift.is_active);
        assert_eq!(result.shift.expected_cash_cents, Some(105_000));
        assert_eq!(result.shift.closed_by.as_deref(), Some(fx.staff_id.as_str()));

        let branch = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert!(!branch.is_shift_opened);
        assert!(fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_records_shortfall() {
        let fx = fixture().await;
        fx.open_shift(100_000).await;

        let result = fx
            .db
            .shifts()
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &close_request(99_000))
            .await
            .unwrap();

        assert_eq!(result.variance.cents(), -1_000);
        assert_eq!(result.shift.variance_cents, Some(-1_000));
    }

    #[tokio::test]
    async fn test_close_without_shift() {
        let fx = fixture().await;
        let result = fx
            .db
            .shifts()
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &close_request(0))
            .await;

        assert!(matches!(result, Err(DbError::Domain(CoreError::NoActiveShift { .. }))));
    }

    #[tokio::test]
    async fn test_second_close_fails_after_first() {
        let fx = fixture().await;
        fx.open_shift(0).await;
        let shifts = fx.db.shifts();

        shifts
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &close_request(0))
            .await
            .unwrap();
        let again = shifts
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &close_request(0))
            .await;

        assert!(matches!(again, Err(DbError::Domain(CoreError::NoActiveShift { .. }))));
    }

    #[tokio::test]
    async fn test_close_with_stock_count_leaves_ledger_alone() {
        let fx = fixture().await;
        fx.stock_up(&fx.branch_id, &fx.product_ids[0], 8).await;
        fx.open_shift(0).await;

        let request = CloseShiftRequest {
            actual_cash_cents: 0,
            note: Some("end of day".into()),
            stock_counts: vec![
                StockCountEntry {
                    product_id: fx.product_ids[0].clone(),
                    actual_count: 7,
                },
                StockCountEntry {
                    product_id: fx.product_ids[1].clone(),
                    actual_count: 2,
                },
            ],
        };

        let result = fx
            .db
            .shifts()
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &request)
            .await
            .unwrap();

        let session_id = result.stock_count_session_id.unwrap();
        assert_eq!(result.stock_count_lines.len(), 2);
        assert_eq!(result.stock_count_lines[0].expected_count, 8);
        assert_eq!(result.stock_count_lines[0].difference, -1);
        assert_eq!(result.stock_count_lines[1].expected_count, 0);
        assert_eq!(result.stock_count_lines[1].difference, 2);

        assert_eq!(fx.db.shifts().stock_count_lines(&session_id).await.unwrap().len(), 2);
        assert_eq!(fx.on_hand(&fx.branch_id, &fx.product_ids[0]).await, 8);
    }

    #[tokio::test]
    async fn test_close_with_unknown_product_rolls_back() {
        let fx = fixture().await;
        fx.open_shift(0).await;

        let request = CloseShiftRequest {
            actual_cash_cents: 0,
            note: None,
            stock_counts: vec![StockCountEntry {
                product_id: "missing".into(),
                actual_count: 1,
            }],
        };

        let result = fx
            .db
            .shifts()
            .close(&fx.store_id, &fx.branch_id, &fx.staff_id, &request)
            .await;

        assert!(matches!(result, Err(DbError::Domain(CoreError::ProductNotFound(_)))));
        assert!(fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap().is_some());
    }

    async fn file_fixture(name: &str) -> (Fixture, PathBuf) {
        let path = std::env::temp_dir().join(format!("katom-{name}-{}.db", new_id()));
        let fx = fixture_with(DbConfig::new(&path).max_connections(8)).await;
        (fx, path)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_admit_exactly_one() {
        let (fx, path) = file_fixture("shift-open").await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let shifts = fx.db.shifts();
            let (store_id, branch_id, staff_id) =
                (fx.store_id.clone(), fx.branch_id.clone(), fx.staff_id.clone());
            handles.push(tokio::spawn(async move {
                shifts.open(&store_id, &branch_id, &staff_id, i * 1_000).await
            }));
        }

        let (mut opened, mut rejected) = (Vec::new(), 0);
        for handle in handles {
            match handle.await.unwrap() {
                Ok(shift) => opened.push(shift),
                Err(DbError::Domain(CoreError::ShiftAlreadyOpen { .. })) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(opened.len(), 1);
        assert_eq!(rejected, 7);
        let active = fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert_eq!(active.id, opened[0].id);
        let branch = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert!(branch.is_shift_opened);

        fx.db.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_closes_admit_exactly_one() {
        let (fx, path) = file_fixture("shift-close").await;
        let shift = fx.open_shift(0).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shifts = fx.db.shifts();
            let (store_id, branch_id, staff_id) =
                (fx.store_id.clone(), fx.branch_id.clone(), fx.staff_id.clone());
            handles.push(tokio::spawn(async move {
                shifts.close(&store_id, &branch_id, &staff_id, &close_request(0)).await
            }));
        }

        let (mut closed, mut rejected) = (Vec::new(), 0);
        for handle in handles {
            match handle.await.unwrap() {
                Ok(result) => closed.push(result),
                Err(DbError::Domain(CoreError::NoActiveShift { .. })) => rejected += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(closed.len(), 1);
        assert_eq!(rejected, 7);
        assert_eq!(closed[0].shift.id, shift.id);
        assert!(fx.db.shifts().active(&fx.store_id, &fx.branch_id).await.unwrap().is_none());
        let branch = fx.db.catalog().branch(&fx.store_id, &fx.branch_id).await.unwrap().unwrap();
        assert!(!branch.is_shift_opened);

        fx.db.close().await;
        let _ = std::fs::remove_file(&path);
    }
}
