//! # Orders
//!
//! Order rows, the create-order request, and the pure totals math that
//! decides whether an order may be written at all.
//!
//! ## Totals
//! ```text
//! subtotal = Σ quantity × unit_price
//! total    = max(0, subtotal − discount_total)
//! paid     = Σ payment.amount          (must be ≥ total)
//! change   = paid − total              (handed back in cash)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::validation::{
    validate_line_count, validate_note, validate_payment_amount, validate_price_cents,
    validate_quantity, validate_required,
};
use crate::{MAX_CART_ITEMS, MAX_PAYMENTS};

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Paid and stock deducted.
    Paid,
    /// Reversed. Stock restored.
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Physical cash. The only method that affects the drawer.
    Cash,
    /// Bank transfer.
    Transfer,
    /// QR payment.
    Qr,
    /// Card on an external terminal.
    Card,
    Other,
}

impl PaymentMethod {
    #[inline]
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }
}

// =============================================================================
// Order Rows
// =============================================================================

/// A sale recorded during a shift.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub store_id: String,
    pub branch_id: String,
    pub shift_id: String,
    pub staff_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub discount_total_cents: i64,
    pub total_price_cents: i64,
    pub change_amount_cents: i64,
    pub status: OrderStatus,
    pub promotion_id: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_price_cents)
    }

    #[inline]
    pub fn change(&self) -> Money {
        Money::from_cents(self.change_amount_cents)
    }
}

/// A line item in an order.
/// Carries the ledger snapshot taken when the line was deducted.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    /// unit_price × quantity.
    pub line_total_cents: i64,
    /// on_hand before this line was deducted.
    pub from_stock: i64,
    /// on_hand after this line was deducted.
    pub to_stock: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    /// Units that actually left stock for this line.
    ///
    /// Lower than `quantity` when the ledger clamped an oversell.
    #[inline]
    pub fn deducted(&self) -> i64 {
        (self.from_stock - self.to_stock).max(0)
    }
}

/// A payment towards an order.
/// An order can have several payments for split tender.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Create Order Request
// =============================================================================

/// One requested line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// One tendered payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

/// Input for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateOrderRequest {
    pub customer_id: Option<String>,
    pub items: Vec<OrderLineRequest>,
    pub payments: Vec<PaymentRequest>,
    #[serde(default)]
    pub discount_total_cents: i64,
    pub promotion_id: Option<String>,
}

impl CreateOrderRequest {
    /// Checks the request shape. No lookups.
    pub fn validate(&self) -> CoreResult<()> {
        if self.items.is_empty() {
            return Err(ValidationError::Required {
                field: "items".to_string(),
            }
            .into());
        }
        validate_line_count("items", self.items.len(), MAX_CART_ITEMS)?;

        for line in &self.items {
            validate_required("product_id", &line.product_id)?;
            validate_quantity(line.quantity)?;
            validate_price_cents(line.unit_price_cents)?;
        }

        if self.payments.is_empty() {
            return Err(ValidationError::Required {
                field: "payments".to_string(),
            }
            .into());
        }
        validate_line_count("payments", self.payments.len(), MAX_PAYMENTS)?;
        for payment in &self.payments {
            validate_payment_amount(payment.amount_cents)?;
        }

        if self.discount_total_cents < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "discount_total".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Distinct product ids in first-seen order.
    pub fn product_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .map(|l| l.product_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Validates a cancellation reason.
pub fn validate_cancel_reason(reason: Option<&str>) -> CoreResult<()> {
    if let Some(reason) = reason {
        validate_note("reason", reason)?;
    }
    Ok(())
}

// =============================================================================
// Totals
// =============================================================================

/// Money figures for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub paid: Money,
    pub change: Money,
}

impl OrderTotals {
    /// Computes the totals and checks that payments cover them.
    ///
    /// ## Errors
    /// - `InsufficientPayment` when Σ payments < total
    /// - `OutOfRange` when a line, the subtotal or Σ payments overflows
    ///
    /// ```rust
    /// use katom_core::order::{OrderLineRequest, OrderTotals, PaymentMethod, PaymentRequest};
    ///
    /// let lines = vec![OrderLineRequest {
    ///     product_id: "p".into(),
    ///     quantity: 2,
    ///     unit_price_cents: 25_000,
    /// }];
    /// let payments = vec![PaymentRequest { method: PaymentMethod::Cash, amount_cents: 60_000 }];
    ///
    /// let totals = OrderTotals::compute(&lines, &payments, 0).unwrap();
    /// assert_eq!(totals.total.cents(), 50_000);
    /// assert_eq!(totals.change.cents(), 10_000);
    /// ```
    pub fn compute(
        lines: &[OrderLineRequest],
        payments: &[PaymentRequest],
        discount_total_cents: i64,
    ) -> CoreResult<Self> {
        let line_totals = lines
            .iter()
            .map(|l| Money::from_cents(l.unit_price_cents).checked_multiply_quantity(l.quantity))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| overflow("line_total"))?;
        let subtotal = Money::checked_sum(line_totals).ok_or_else(|| overflow("subtotal"))?;
        let discount = Money::from_cents(discount_total_cents).floor_zero();
        let total = subtotal
            .checked_sub(discount)
            .ok_or_else(|| overflow("total"))?
            .floor_zero();
        let paid = Money::checked_sum(payments.iter().map(|p| Money::from_cents(p.amount_cents)))
            .ok_or_else(|| overflow("payments"))?;

        if paid < total {
            return Err(CoreError::InsufficientPayment {
                total: total.cents(),
                paid: paid.cents(),
            });
        }

        Ok(OrderTotals {
            subtotal,
            discount,
            total,
            paid,
            change: paid - total,
        })
    }
}

fn overflow(field: &str) -> CoreError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

/// An order with its lines and payments, as returned to the till.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderReceipt {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
}

impl OrderReceipt {
    /// Cash and non-cash payments summed.
    pub fn paid(&self) -> Money {
        self.payments.iter().map(Payment::amount).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
