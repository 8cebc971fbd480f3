//! # Loyalty Points
//!
//! Per-product point balances, the point ledger, and the accrual job payload.
//!
//! ## Points Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Order committed ──► points_accrual_queue (ACCRUE job, same tx)        │
//! │                              │                                          │
//! │                              ▼ worker                                   │
//! │                 customer_product_points  += units bought               │
//! │                 point_transactions       EARN  (+n)                    │
//! │                                                                         │
//! │  Redeem ──► customer_product_points -= cost  (WHERE points >= cost)    │
//! │             point_transactions       REDEEM (−cost)                    │
//! │             point_redemptions                                           │
//! │                                                                         │
//! │  Order cancelled ──► REVERSE job ──► −min(earned, balance) REVERSAL    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One point is earned per unit purchased, per product.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::CoreResult;
use crate::validation::{validate_quantity, validate_required};

/// Default page size for point history.
pub const DEFAULT_HISTORY_PAGE_SIZE: i64 = 20;

// =============================================================================
// Point Transaction Kind
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointTransactionKind {
    Earn,
    Redeem,
    Reversal,
}

impl fmt::Display for PointTransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PointTransactionKind::Earn => "EARN",
            PointTransactionKind::Redeem => "REDEEM",
            PointTransactionKind::Reversal => "REVERSAL",
        })
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A customer's balance for one product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PointsBalance {
    pub store_id: String,
    pub customer_id: String,
    pub product_id: String,
    /// Spendable points.
    pub points: i64,
    /// Lifetime points earned.
    pub total_points: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Balance line shown to staff, joined with the product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ProductPoints {
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    pub points: i64,
    pub total_points: i64,
    pub points_to_redeem: Option<i64>,
    /// Balance covers at least one unit.
    pub can_redeem: bool,
}

/// Immutable point ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PointTransaction {
    pub id: String,
    pub store_id: String,
    pub branch_id: String,
    pub customer_id: String,
    pub product_id: String,
    pub kind: PointTransactionKind,
    /// Signed change.
    pub points_change: i64,
    pub reference_table: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
    pub staff_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PointRedemption {
    pub id: String,
    pub store_id: String,
    pub branch_id: String,
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub points_used: i64,
    pub staff_id: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A page of point history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PointHistoryPage {
    pub items: Vec<PointTransaction>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Who and where a point mutation is booked against.
#[derive(Debug, Clone)]
pub struct PointsContext {
    pub store_id: String,
    pub branch_id: String,
    pub customer_id: String,
    pub staff_id: Option<String>,
    pub reference_table: Option<String>,
    pub reference_id: Option<String>,
}

impl PointsContext {
    pub fn new(
        store_id: impl Into<String>,
        branch_id: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> Self {
        PointsContext {
            store_id: store_id.into(),
            branch_id: branch_id.into(),
            customer_id: customer_id.into(),
            staff_id: None,
            reference_table: None,
            reference_id: None,
        }
    }

    pub fn staff(mut self, staff_id: impl Into<String>) -> Self {
        self.staff_id = Some(staff_id.into());
        self
    }

    pub fn reference(mut self, table: impl Into<String>, id: impl Into<String>) -> Self {
        self.reference_table = Some(table.into());
        self.reference_id = Some(id.into());
        self
    }
}

// =============================================================================
// Redemption
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RedeemRequest {
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i64,
}

impl RedeemRequest {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("customer_id", &self.customer_id)?;
        validate_required("product_id", &self.product_id)?;
        validate_quantity(self.quantity)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RedeemResult {
    pub redemption_id: String,
    pub points_used: i64,
    pub remaining_points: i64,
    pub product_name: String,
    pub quantity: i64,
}

// =============================================================================
// Accrual Jobs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualKind {
    /// Earn points for a paid order.
    Accrue,
    /// Take back points for a cancelled order.
    Reverse,
}

/// Units bought of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccrualLine {
    pub product_id: String,
    pub quantity: i64,
}

/// An outbox row waiting to be applied to the points ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AccrualJob {
    pub id: String,
    pub kind: AccrualKind,
    pub store_id: String,
    pub branch_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub staff_id: String,
    /// JSON array of [`AccrualLine`].
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl AccrualJob {
    /// Decodes the line payload.
    pub fn lines(&self) -> Result<Vec<AccrualLine>, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Encodes lines for the outbox payload.
pub fn encode_lines(lines: &[AccrualLine]) -> Result<String, serde_json::Error> {
    serde_json::to_string(lines)
}

/// Merges duplicate products, keeping first-seen order.
///
/// Returns `(product_id, points)` with one point per unit.
///
/// ```rust
/// use katom_core::loyalty::{points_per_product, AccrualLine};
///
/// let lines = vec![
///     AccrualLine { product_id: "a".into(), quantity: 2 },
///     AccrualLine { product_id: "b".into(), quantity: 1 },
///     AccrualLine { product_id: "a".into(), quantity: 3 },
/// ];
/// assert_eq!(points_per_product(&lines), vec![("a".to_string(), 5), ("b".to_string(), 1)]);
/// ```
pub fn points_per_product(lines: &[AccrualLine]) -> Vec<(String, i64)> {
    let mut merged: Vec<(String, i64)> = Vec::new();
    for line in lines.iter().filter(|l| l.quantity > 0) {
        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, points)) => *points += line.quantity,
            None => merged.push((line.product_id.clone(), line.quantity)),
        }
    }
    merged
}

/// Points actually taken back when `wanted` exceeds what is left.
#[inline]
pub fn reversible_points(wanted: i64, balance: i64) -> i64 {
    wanted.min(balance).max(0)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: &str, qty: i64) -> AccrualLine {
        AccrualLine {
            product_id: product.to_string(),
            quantity: qty,
        }
    }

    #[test]
    fn test_points_per_product_merges_duplicates() {
        let merged = points_per_product(&[line("a", 2), line("b", 1), line("a", 3)]);
        assert_eq!(merged, vec![("a".to_string(), 5), ("b".to_string(), 1)]);
    }

    #[test]
    fn test_points_per_product_skips_empty_lines() {
        assert!(points_per_product(&[line("a", 0)]).is_empty());
    }

    #[test]
    fn test_payload_round_trip() {
        let lines = vec![line("a", 2)];
        let payload = encode_lines(&lines).unwrap();
        let job = AccrualJob {
            id: "j".into(),
            kind: AccrualKind::Accrue,
            store_id: "s".into(),
            branch_id: "b".into(),
            order_id: "o".into(),
            customer_id: "c".into(),
            staff_id: "u".into(),
            payload,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            processed_at: None,
        };
        assert_eq!(job.lines().unwrap(), lines);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let job = AccrualJob {
            id: "j".into(),
            kind: AccrualKind::Reverse,
            store_id: "s".into(),
            branch_id: "b".into(),
            order_id: "o".into(),
            customer_id: "c".into(),
            staff_id: "u".into(),
            payload: "not json".into(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            attempted_at: None,
            processed_at: None,
        };
        assert!(job.lines().is_err());
    }

    #[test]
    fn test_reversible_points() {
        assert_eq!(reversible_points(5, 10), 5);
        assert_eq!(reversible_points(5, 3), 3);
        assert_eq!(reversible_points(5, 0), 0);
    }

    #[test]
    fn test_redeem_request_validation() {
        let ok = RedeemRequest {
            customer_id: "c".into(),
            product_id: "p".into(),
            quantity: 1,
        };
        assert!(ok.validate().is_ok());
        assert!(RedeemRequest { quantity: 0, ..ok }.validate().is_err());
    }
}
