//! # Shifts
//!
//! Shift rows and the cash-drawer reconciliation math.
//!
//! ## Drawer Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  expected = starting cash                                               │
//! │           + Σ CASH payments            (PAID orders of this shift)     │
//! │           − Σ change given             (PAID orders with a CASH line)  │
//! │                                                                         │
//! │  variance = counted cash − expected    (negative = drawer short)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Change is only subtracted for orders that took cash, so a card overpay
//! never drains the drawer on paper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreResult;
use crate::money::Money;
use crate::validation::{
    validate_line_count, validate_non_negative, validate_note, validate_required, validate_unique,
};

/// Upper bound on stock count lines submitted at close.
pub const MAX_STOCK_COUNT_LINES: usize = 500;

// =============================================================================
// Shift
// =============================================================================

/// A cashier shift at one branch.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shift {
    pub id: String,
    pub store_id: String,
    pub branch_id: String,
    pub starting_cash_cents: i64,
    /// Counted cash. Set on close.
    pub ending_cash_cents: Option<i64>,
    pub expected_cash_cents: Option<i64>,
    pub variance_cents: Option<i64>,
    pub close_note: Option<String>,
    pub opened_by: String,
    pub closed_by: Option<String>,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    #[inline]
    pub fn starting_cash(&self) -> Money {
        Money::from_cents(self.starting_cash_cents)
    }
}

/// Answer to "is a shift open here?". Absence is not an error.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CurrentShift {
    pub has_active_shift: bool,
    pub shift: Option<Shift>,
}

impl From<Option<Shift>> for CurrentShift {
    fn from(shift: Option<Shift>) -> Self {
        CurrentShift {
            has_active_shift: shift.is_some(),
            shift,
        }
    }
}

// =============================================================================
// Cash Movements
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashMovementKind {
    /// Cash taken out of the drawer (change handed back, petty cash).
    PaidOut,
    /// Cash put into the drawer outside of a sale.
    PaidIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CashDirection {
    Out,
    In,
}

/// A drawer movement recorded against a shift.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct ShiftCashMovement {
    pub id: String,
    pub shift_id: String,
    pub kind: CashMovementKind,
    pub direction: CashDirection,
    pub amount_cents: i64,
    pub note: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Totals
// =============================================================================

/// Aggregates read from a shift's order history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShiftTotals {
    pub starting_cash: Money,
    /// Σ CASH payments on PAID orders.
    pub cash_payments: Money,
    /// Σ change on PAID orders that have a CASH payment.
    pub cash_change: Money,
    /// Σ total_price of PAID orders.
    pub total_sales: Money,
    pub order_count: i64,
    pub cancelled_total: Money,
    pub cancelled_count: i64,
}

impl ShiftTotals {
    /// Cash that should be in the drawer.
    ///
    /// ```rust
    /// use katom_core::money::Money;
    /// use katom_core::shift::ShiftTotals;
    ///
    /// let totals = ShiftTotals {
    ///     starting_cash: Money::from_cents(100_000),
    ///     cash_payments: Money::from_cents(60_000),
    ///     cash_change: Money::from_cents(10_000),
    ///     ..ShiftTotals::default()
    /// };
    /// assert_eq!(totals.expected_cash().cents(), 150_000);
    /// ```
    pub fn expected_cash(&self) -> Money {
        self.starting_cash + self.cash_payments - self.cash_change
    }

    /// Counted minus expected.
    pub fn variance(&self, actual_cash: Money) -> Money {
        actual_cash - self.expected_cash()
    }
}

/// Figures shown to staff before closing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShiftSummary {
    pub shift_id: String,
    pub starting_cash: Money,
    pub cash_payments: Money,
    pub cash_change: Money,
    pub expected_cash: Money,
    pub total_sales: Money,
    pub order_count: i64,
    pub cancelled_total: Money,
    pub cancelled_count: i64,
}

impl ShiftSummary {
    pub fn new(shift_id: impl Into<String>, totals: &ShiftTotals) -> Self {
        ShiftSummary {
            shift_id: shift_id.into(),
            starting_cash: totals.starting_cash,
            cash_payments: totals.cash_payments,
            cash_change: totals.cash_change,
            expected_cash: totals.expected_cash(),
            total_sales: totals.total_sales,
            order_count: totals.order_count,
            cancelled_total: totals.cancelled_total,
            cancelled_count: totals.cancelled_count,
        }
    }
}

// =============================================================================
// Stock Counts
// =============================================================================

/// A physical count submitted at close.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockCountEntry {
    pub product_id: String,
    pub actual_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockCountLine {
    pub id: String,
    pub session_id: String,
    pub product_id: String,
    /// Ledger on_hand at close.
    pub expected_count: i64,
    pub actual_count: i64,
    /// actual − expected.
    pub difference: i64,
}

// =============================================================================
// Close
// =============================================================================

/// Input for closing the branch's shift.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CloseShiftRequest {
    pub actual_cash_cents: i64,
    pub note: Option<String>,
    #[serde(default)]
    pub stock_counts: Vec<StockCountEntry>,
}

impl CloseShiftRequest {
    pub fn validate(&self) -> CoreResult<()> {
        validate_non_negative("actual_cash", self.actual_cash_cents)?;
        if let Some(note) = &self.note {
            validate_note("note", note)?;
        }

        validate_line_count("stock_counts", self.stock_counts.len(), MAX_STOCK_COUNT_LINES)?;
        for entry in &self.stock_counts {
            validate_required("product_id", &entry.product_id)?;
            validate_non_negative("actual_count", entry.actual_count)?;
        }
        validate_unique(
            "product_id",
            self.stock_counts.iter().map(|e| e.product_id.as_str()),
        )?;
        Ok(())
    }
}

/// Outcome of a close.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CloseShiftResult {
    pub shift: Shift,
    pub summary: ShiftSummary,
    pub variance: Money,
    pub stock_count_session_id: Option<String>,
    pub stock_count_lines: Vec<StockCountLine>,
}

// =============================================================================
// Unit Tests
// =============================================================================
