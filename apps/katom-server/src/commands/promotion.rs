//! # Promotion Commands
//!
//! Read-only: promotions are evaluated against a cart, never written here.
//! Persisting the chosen discount happens with the order.

use chrono::Utc;
use katom_core::promotion::{self, CartLine, DiscountResult};
use katom_core::validation::{validate_line_count, validate_price_cents, validate_quantity};
use katom_core::{CoreError, CoreResult, Money, Promotion, MAX_CART_ITEMS};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use crate::error::ApiResult;
use crate::session::SessionContext;
use crate::AppState;

/// A cart to price against a promotion.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountRequest {
    pub items: Vec<CartLine>,
    /// Replaces Σ line totals when present and non-zero.
    #[serde(default)]
    pub subtotal: Option<Money>,
}

fn validate_cart(cart: &[CartLine]) -> CoreResult<()> {
    validate_line_count("items", cart.len(), MAX_CART_ITEMS)?;
    for line in cart {
        validate_quantity(line.quantity)?;
        validate_price_cents(line.unit_price.cents())?;
    }
    Ok(())
}

/// Promotions running at the session branch right now.
pub async fn list_promotions(app: &AppState, session: &SessionContext) -> ApiResult<Vec<Promotion>> {
    let branch_id = session.require_branch()?;
    Ok(app
        .db()
        .promotions()
        .active_for_branch(&session.store_id, branch_id, Utc::now())
        .await?)
}

/// Prices one named promotion against the cart.
///
/// ## Errors
/// `NOT_FOUND` when the promotion is not part of the session's store.
pub async fn calculate_discount(
    app: &AppState,
    session: &SessionContext,
    promotion_id: &str,
    request: &DiscountRequest,
) -> ApiResult<DiscountResult> {
    validate_cart(&request.items)?;

    let promotion = app
        .db()
        .promotions()
        .get(&session.store_id, promotion_id)
        .await?
        .ok_or_else(|| CoreError::PromotionNotFound(promotion_id.to_string()))?;

    let result = promotion::calculate(&promotion, &request.items, request.subtotal);
    debug!(
        promotion_id = %promotion_id,
        discount = %result.discount,
        applicable = result.is_applicable,
        "Discount calculated"
    );
    Ok(result)
}

/// Every promotion at the session branch that discounts this cart.
pub async fn detect_promotions(
    app: &AppState,
    session: &SessionContext,
    cart: &[CartLine],
) -> ApiResult<Vec<DiscountResult>> {
    validate_cart(cart)?;

    let now = Utc::now();
    let branch_id = session.require_branch()?;
    let promotions = app
        .db()
        .promotions()
        .active_for_branch(&session.store_id, branch_id, now)
        .await?;

    let results = promotion::detect(&promotions, cart, now);
    debug!(
        branch_id = %branch_id,
        candidates = promotions.len(),
        applicable = results.len(),
        "Promotions detected"
    );
    Ok(results)
}

// =============================================================================
// Unit Tests
// =============================================================================
