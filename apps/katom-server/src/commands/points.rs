//! # Points Commands
//!
//! Member balances are kept per product: buying a product earns points on
//! that product, and redeeming spends them on the same product.

use katom_core::loyalty::{PointHistoryPage, PointsContext, ProductPoints, RedeemRequest, RedeemResult};
use katom_core::CoreError;
use tracing::{debug, info};

use crate::error::ApiResult;
use crate::session::SessionContext;
use crate::AppState;

async fn require_customer(app: &AppState, session: &SessionContext, customer_id: &str) -> ApiResult<()> {
    match app.db().catalog().customer(&session.store_id, customer_id).await? {
        Some(_) => Ok(()),
        None => Err(CoreError::CustomerNotFound(customer_id.to_string()).into()),
    }
}

/// Positive balances of a member, with whether each can be redeemed now.
pub async fn point_balances(
    app: &AppState,
    session: &SessionContext,
    customer_id: &str,
) -> ApiResult<Vec<ProductPoints>> {
    require_customer(app, session, customer_id).await?;
    Ok(app
        .db()
        .points()
        .balances(&session.store_id, customer_id)
        .await?)
}

/// Exchanges a member's points for units of a product.
///
/// ## Errors
/// - `VALIDATION_ERROR` when the product has no redemption cost
/// - `INSUFFICIENT_RESOURCE` when the balance is short
/// - `NOT_FOUND` for an unknown product or member
pub async fn redeem_points(
    app: &AppState,
    session: &SessionContext,
    request: RedeemRequest,
) -> ApiResult<RedeemResult> {
    let branch_id = session.require_branch()?;
    let staff_id = session.require_staff()?;
    request.validate()?;
    debug!(customer_id = %request.customer_id, product_id = %request.product_id, "redeem_points command");

    let product = app
        .db()
        .catalog()
        .product(&session.store_id, &request.product_id)
        .await?
        .ok_or_else(|| CoreError::ProductNotFound(request.product_id.clone()))?;
    require_customer(app, session, &request.customer_id).await?;

    let ctx = PointsContext::new(&session.store_id, branch_id, &request.customer_id).staff(staff_id);
    let result = app.db().points().redeem(&ctx, &product, request.quantity).await?;

    info!(
        redemption_id = %result.redemption_id,
        points_used = result.points_used,
        remaining = result.remaining_points,
        "Points redeemed"
    );
    Ok(result)
}

/// A member's point transactions, newest first. `page` starts at 1.
pub async fn point_history(
    app: &AppState,
    session: &SessionContext,
    customer_id: &str,
    page: i64,
    limit: i64,
) -> ApiResult<PointHistoryPage> {
    require_customer(app, session, customer_id).await?;
    Ok(app
        .db()
        .points()
        .history(&session.store_id, customer_id, page, limit)
        .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================
