//! # Domain Types
//!
//! Catalog and stock ledger types shared by every Katom POS component.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Catalog (collaborator data)          Stock Ledger                     │
//! │  ┌─────────────────┐                  ┌─────────────────────────┐      │
//! │  │    Branch       │                  │      StockLevel         │      │
//! │  │  is_shift_opened│                  │  (branch, product) key  │      │
//! │  ├─────────────────┤                  │  on_hand ≥ 0            │      │
//! │  │    Product      │                  └───────────┬─────────────┘      │
//! │  │  base_price     │                              │ 1..*              │
//! │  │  points_to_     │                  ┌───────────▼─────────────┐      │
//! │  │  redeem         │                  │     StockMovement       │      │
//! │  ├─────────────────┤                  │  kind, quantity_change  │      │
//! │  │    Customer     │                  │  from_stock → to_stock  │      │
//! │  └─────────────────┘                  │  reference (table, id)  │      │
//! │                                       └─────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ledger Invariant
//! For every (branch, product) key, `on_hand` equals the sum of the
//! `quantity_change` of its movements. `quantity_change` is what was actually
//! applied after clamping, `requested_change` is what the caller asked for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// Catalog
// =============================================================================

/// A physical branch of a store.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Branch {
    pub id: String,
    pub store_id: String,
    pub name: String,
    /// Mirrors whether a shift row with `is_active = 1` exists.
    pub is_shift_opened: bool,
    #[ts(as = "Option<String>")]
    pub shift_opened_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub shift_closed_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A product sold by a store.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Store this product belongs to.
    pub store_id: String,

    /// Display name shown to staff and on redemption receipts.
    pub name: String,

    pub category: Option<String>,

    /// List price in minor units.
    pub base_price_cents: i64,

    /// Points needed to exchange one unit. `None` = not redeemable.
    pub points_to_redeem: Option<i64>,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the list price as a Money type.
    #[inline]
    pub fn base_price(&self) -> Money {
        Money::from_cents(self.base_price_cents)
    }

    /// Points required to redeem `quantity` units.
    ///
    /// ## Errors
    /// `NotRedeemable` when the product carries no positive redeem cost.
    pub fn redeem_cost(&self, quantity: i64) -> CoreResult<i64> {
        match self.points_to_redeem {
            Some(points) if points > 0 => Ok(points * quantity),
            _ => Err(ValidationError::NotRedeemable {
                product_id: self.id.clone(),
            }
            .into()),
        }
    }
}

/// A loyalty member.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: String,
    pub store_id: String,
    /// Member code printed on the card.
    pub code: String,
    pub full_name: String,
    pub phone_last4: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Movement Kind
// =============================================================================

/// Why a stock level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    /// Deducted by a paid order.
    Sale,
    /// Restored by an order cancellation.
    CancelSale,
    /// Goods received from a supplier.
    Receive,
    /// Goods issued for internal use.
    Issue,
    /// Manual correction.
    Adjust,
    /// Arrived from another branch (or restored after a cancelled transfer).
    TransferIn,
    /// Left for another branch.
    TransferOut,
    /// Written off as damaged.
    Damage,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Sale => "SALE",
            MovementKind::CancelSale => "CANCEL_SALE",
            MovementKind::Receive => "RECEIVE",
            MovementKind::Issue => "ISSUE",
            MovementKind::Adjust => "ADJUST",
            MovementKind::TransferIn => "TRANSFER_IN",
            MovementKind::TransferOut => "TRANSFER_OUT",
            MovementKind::Damage => "DAMAGE",
        }
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stock Level
// =============================================================================

/// Current on-hand quantity for one (branch, product).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockLevel {
    pub store_id: String,
    pub branch_id: String,
    pub product_id: String,
    /// Never negative at rest.
    pub on_hand: i64,
    pub reorder_level: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// True when stock has fallen to or below the reorder level.
    pub fn is_low(&self) -> bool {
        self.reorder_level > 0 && self.on_hand <= self.reorder_level
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// Immutable ledger entry. Created, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    pub store_id: String,
    pub branch_id: String,
    pub product_id: String,
    pub kind: MovementKind,
    /// Change actually applied (`to_stock - from_stock`).
    pub quantity_change: i64,
    /// Change the caller asked for, before clamping.
    pub requested_change: i64,
    pub from_stock: i64,
    pub to_stock: i64,
    pub reason: Option<String>,
    pub actor_id: String,
    pub reference_table: Option<String>,
    pub reference_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Points a movement at the record that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockReference {
    pub table: String,
    pub id: String,
}

impl StockReference {
    pub fn order(id: impl Into<String>) -> Self {
        StockReference {
            table: "orders".to_string(),
            id: id.into(),
        }
    }

    pub fn transfer(id: impl Into<String>) -> Self {
        StockReference {
            table: "stock_transfers".to_string(),
            id: id.into(),
        }
    }
}

/// A requested change to one stock level.
#[derive(Debug, Clone)]
pub struct StockAdjustment {
    pub store_id: String,
    pub branch_id: String,
    pub product_id: String,
    /// Signed change. Negative deducts.
    pub delta: i64,
    pub kind: MovementKind,
    pub actor_id: String,
    pub reference: Option<StockReference>,
    pub reason: Option<String>,
}

impl StockAdjustment {
    /// Builds an adjustment with no reference or reason.
    pub fn new(
        store_id: impl Into<String>,
        branch_id: impl Into<String>,
        product_id: impl Into<String>,
        delta: i64,
        kind: MovementKind,
        actor_id: impl Into<String>,
    ) -> Self {
        StockAdjustment {
            store_id: store_id.into(),
            branch_id: branch_id.into(),
            product_id: product_id.into(),
            delta,
            kind,
            actor_id: actor_id.into(),
            reference: None,
            reason: None,
        }
    }

    pub fn with_reference(mut self, reference: StockReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outcome of a ledger adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockChange {
    /// Id of the movement row written with the change.
    pub movement_id: String,
    pub before: i64,
    pub after: i64,
}

impl StockChange {
    /// The change that actually landed on the level.
    #[inline]
    pub fn applied(&self) -> i64 {
        self.after - self.before
    }

    /// True when the requested deduction could not be fully honoured.
    #[inline]
    pub fn was_clamped(&self, requested: i64) -> bool {
        self.applied() != requested
    }
}

/// Computes the level after applying `delta`, clamped at zero.
///
/// ```rust
/// use katom_core::types::clamp_on_hand;
///
/// assert_eq!(clamp_on_hand(10, -6), 4);
/// assert_eq!(clamp_on_hand(4, -6), 0);
/// assert_eq!(clamp_on_hand(0, 3), 3);
/// ```
#[inline]
pub fn clamp_on_hand(before: i64, delta: i64) -> i64 {
    before.saturating_add(delta).max(0)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn product(points: Option<i64>) -> Product {
        let now = Utc::now();
        Product {
            id: "p-1".to_string(),
            store_id: "s-1".to_string(),
            name: "Latte".to_string(),
            category: None,
            base_price_cents: 6_500,
            points_to_redeem: points,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_clamp_on_hand_never_negative() {
        assert_eq!(clamp_on_hand(10, -6), 4);
        assert_eq!(clamp_on_hand(4, -6), 0);
        assert_eq!(clamp_on_hand(0, -1), 0);
        assert_eq!(clamp_on_hand(i64::MIN, -1), 0);
    }

    #[test]
    fn test_stock_change_applied() {
        let change = StockChange {
            movement_id: "m-1".to_string(),
            before: 4,
            after: 0,
        };
        assert_eq!(change.applied(), -4);
        assert!(change.was_clamped(-6));
        assert!(!change.was_clamped(-4));
    }

    #[test]
    fn test_redeem_cost() {
        assert_eq!(product(Some(50)).redeem_cost(3).unwrap(), 150);

        let err = product(None).redeem_cost(1).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::NotRedeemable { .. })
        ));
        assert!(product(Some(0)).redeem_cost(1).is_err());
    }

    #[test]
    fn test_movement_kind_display() {
        assert_eq!(MovementKind::CancelSale.to_string(), "CANCEL_SALE");
        assert_eq!(
            serde_json::to_string(&MovementKind::TransferOut).unwrap(),
            "\"TRANSFER_OUT\""
        );
    }

    #[test]
    fn test_low_stock() {
        let level = StockLevel {
            store_id: "s".into(),
            branch_id: "b".into(),
            product_id: "p".into(),
            on_hand: 3,
            reorder_level: 5,
            updated_at: Utc::now(),
        };
        assert!(level.is_low());
    }
}
