//! # Order Commands
//!
//! ## Create Flow
//! ```text
//! create_order(session, request)
//!   │
//!   ├─ require branch + staff ─────────────► PRECONDITION_FAILED
//!   ├─ NewOrder::from_request
//!   │     lines, payments, discount ───────► VALIDATION_ERROR
//!   │     Σ payments < total ──────────────► INSUFFICIENT_RESOURCE
//!   ├─ create_order_tx (one transaction)
//!   │     no active shift ─────────────────► PRECONDITION_FAILED
//!   │     unknown product/customer/promo ──► NOT_FOUND
//!   └─ kick accrual worker (after commit)
//! ```

use katom_core::order::CreateOrderRequest;
use katom_core::{CoreError, Order, OrderReceipt};
use katom_db::NewOrder;
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::session::SessionContext;
use crate::AppState;

/// Records a paid order: stock, payments, change and loyalty outbox.
pub async fn create_order(
    app: &AppState,
    session: &SessionContext,
    request: CreateOrderRequest,
) -> ApiResult<OrderReceipt> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    debug!(branch_id = %branch_id, lines = request.items.len(), "create_order command");

    let order = NewOrder::from_request(
        &session.store_id,
        branch_id,
        staff_id,
        request,
        app.config().loyalty.accrual_enabled,
    )?;
    let receipt = app.db().orders().create_order_tx(&order).await?;

    if order.accrue_points && receipt.order.customer_id.is_some() {
        app.kick_accrual();
    }

    Ok(receipt)
}

/// Cancels a paid order and puts its stock back.
///
/// Points already earned are taken back through the accrual queue when
/// `loyalty.reverse_on_cancel` is set.
pub async fn cancel_order(
    app: &AppState,
    session: &SessionContext,
    order_id: &str,
    reason: Option<String>,
) -> ApiResult<OrderReceipt> {
    let staff_id = session.require_staff()?;
    debug!(order_id = %order_id, "cancel_order command");

    let receipt = app
        .db()
        .orders()
        .cancel_order(
            &session.store_id,
            order_id,
            staff_id,
            reason.as_deref(),
            app.config().loyalty.reverse_on_cancel,
        )
        .await?;

    if receipt.order.customer_id.is_some() {
        app.kick_accrual();
    }

    Ok(receipt)
}

pub async fn get_order(
    app: &AppState,
    session: &SessionContext,
    order_id: &str,
) -> ApiResult<OrderReceipt> {
    app.db()
        .orders()
        .get(&session.store_id, order_id)
        .await?
        .ok_or_else(|| CoreError::OrderNotFound(order_id.to_string()).into())
}

/// Orders of a shift, newest first. Defaults to the branch's open shift.
pub async fn orders_for_shift(
    app: &AppState,
    session: &SessionContext,
    shift_id: Option<&str>,
) -> ApiResult<Vec<Order>> {
    let shift_id = match shift_id {
        Some(id) => id.to_string(),
        None => {
            let branch_id = session.require_branch()?;
            app.db()
                .shifts()
                .active(&session.store_id, branch_id)
                .await?
                .ok_or_else(|| CoreError::NoActiveShift {
                    branch_id: branch_id.to_string(),
                })?
                .id
        }
    };

    let orders = app
        .db()
        .orders()
        .list_for_shift(&session.store_id, &shift_id)
        .await?;

    info!(shift_id = %shift_id, count = orders.len(), "Listed shift orders");
    Ok(orders)
}

// =============================================================================
// Unit Tests
// =============================================================================
