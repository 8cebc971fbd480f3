//! # Shift Commands
//!
//! ```text
//!   open_shift ──► [active] ──► shift_summary (any number of times)
//!                     │
//!                     └──► close_shift ──► drawer variance + optional stock count
//! ```

use katom_core::shift::{CloseShiftRequest, CloseShiftResult, CurrentShift, ShiftSummary};
use katom_core::Shift;
use tracing::debug;

use crate::error::ApiResult;
use crate::session::SessionContext;
use crate::AppState;

/// Opens a shift at the session branch.
///
/// ## Errors
/// - `PRECONDITION_FAILED` when the branch already has an open shift
/// - `NOT_FOUND` when the branch is not part of the store
pub async fn open_shift(
    app: &AppState,
    session: &SessionContext,
    starting_cash_cents: i64,
) -> ApiResult<Shift> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    debug!(branch_id = %branch_id, starting_cash_cents, "open_shift command");

    Ok(app
        .db()
        .shifts()
        .open(&session.store_id, branch_id, staff_id, starting_cash_cents)
        .await?)
}

/// Whether the session branch has an open shift. Never fails for "no shift".
pub async fn current_shift(app: &AppState, session: &SessionContext) -> ApiResult<CurrentShift> {
    let branch_id = session.require_branch()?;
    Ok(app
        .db()
        .shifts()
        .active(&session.store_id, branch_id)
        .await?
        .into())
}

pub async fn shift_summary(app: &AppState, session: &SessionContext) -> ApiResult<ShiftSummary> {
    let branch_id = session.require_branch()?;
    Ok(app.db().shifts().summary(&session.store_id, branch_id).await?)
}

/// Closes the open shift, reconciling the drawer against `actual_cash_cents`.
pub async fn close_shift(
    app: &AppState,
    session: &SessionContext,
    request: CloseShiftRequest,
) -> ApiResult<CloseShiftResult> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    debug!(branch_id = %branch_id, counts = request.stock_counts.len(), "close_shift command");

    Ok(app
        .db()
        .shifts()
        .close(&session.store_id, branch_id, staff_id, &request)
        .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::order::{cancel_order, create_order};
    use crate::error::ErrorCode;
    use crate::testing::{fixture, order_request};
    use katom_core::shift::StockCountEntry;

    fn close_at(actual_cash_cents: i64) -> CloseShiftRequest {
        CloseShiftRequest {
            actual_cash_cents,
            note: None,
            stock_counts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_second_open_fails_and_keeps_first() {
        let fx = fixture().await;
        let first = open_shift(&fx.app, &fx.session(), 1_000).await.unwrap();

        let err = open_shift(&fx.app, &fx.session(), 2_000).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);

        let current = current_shift(&fx.app, &fx.session()).await.unwrap();
        assert!(current.has_active_shift);
        assert_eq!(current.shift.unwrap().id, first.id);
        let branch = fx
            .db()
            .catalog()
            .branch(&fx.store_id, &fx.branch_id)
            .await
            .unwrap()
            .unwrap();
        assert!(branch.is_shift_opened);
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_branch() {
        let fx = fixture().await;
        let session = SessionContext::new(&fx.store_id).branch("nowhere").staff("staff-1");

        let err = open_shift(&fx.app, &session, 0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_current_shift_absent_is_not_an_error() {
        let fx = fixture().await;
        let current = current_shift(&fx.app, &fx.session()).await.unwrap();
        assert!(!current.has_active_shift);
        assert!(current.shift.is_none());

        let err = shift_summary(&fx.app, &fx.session()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_expected_cash_end_to_end() {
        let fx = fixture().await;
        open_shift(&fx.app, &fx.session(), 1_000).await.unwrap();

        let mut request = order_request(&fx, &[(0, 1)], 600, false);
        request.items[0].unit_price_cents = 500;
        create_order(&fx.app, &fx.session(), request).await.unwrap();

        let summary = shift_summary(&fx.app, &fx.session()).await.unwrap();
        assert_eq!(summary.cash_payments.cents(), 600);
        assert_eq!(summary.cash_change.cents(), 100);
        assert_eq!(summary.expected_cash.cents(), 1_500);

        let closed = close_shift(&fx.app, &fx.session(), close_at(1_500)).await.unwrap();
        assert_eq!(closed.variance.cents(), 0);
        assert!(!closed.shift.is_active);

        let current = current_shift(&fx.app, &fx.session()).await.unwrap();
        assert!(!current.has_active_shift);
    }

    #[tokio::test]
    async fn test_cancelled_orders_leave_drawer_figures() {
        let fx = fixture().await;
        open_shift(&fx.app, &fx.session(), 0).await.unwrap();

        let kept = order_request(&fx, &[(1, 1)], 2_500, false);
        create_order(&fx.app, &fx.session(), kept).await.unwrap();
        let voided = create_order(&fx.app, &fx.session(), order_request(&fx, &[(0, 1)], 10_000, false))
            .await
            .unwrap();
        cancel_order(&fx.app, &fx.session(), &voided.order.id, Some("void".into()))
            .await
            .unwrap();

        let summary = shift_summary(&fx.app, &fx.session()).await.unwrap();
        assert_eq!(summary.order_count, 1);
        assert_eq!(summary.total_sales.cents(), 2_500);
        assert_eq!(summary.cancelled_count, 1);
        assert_eq!(summary.cancelled_total.cents(), 10_000);
        assert_eq!(summary.expected_cash.cents(), 2_500);
    }

    #[tokio::test]
    async fn test_close_with_stock_count() {
        let fx = fixture().await;
        open_shift(&fx.app, &fx.session(), 0).await.unwrap();
        fx.stock_up(0, 8).await;

        let mut request = close_at(0);
        request.stock_counts = vec![StockCountEntry {
            product_id: fx.product_ids[0].clone(),
            actual_count: 7,
        }];

        let closed = close_shift(&fx.app, &fx.session(), request).await.unwrap();
        assert!(closed.stock_count_session_id.is_some());
        assert_eq!(closed.stock_count_lines[0].expected_count, 8);
        assert_eq!(closed.stock_count_lines[0].difference, -1);
        assert_eq!(fx.on_hand(&fx.branch_id, 0).await, 8);

        let err = close_shift(&fx.app, &fx.session(), close_at(0)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PreconditionFailed);
    }
}
