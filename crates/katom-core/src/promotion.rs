//! # Promotion Discount Engine
//!
//! Pure evaluation of promotion rules against cart contents.
//!
//! ## Rule Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       PromotionRule (closed enum)                       │
//! │                                                                         │
//! │  Scope: product set empty → BILL LEVEL (every line)                    │
//! │         product set given → only lines whose product is in the set     │
//! │                                                                         │
//! │  PercentDiscount   in-scope subtotal × pct        (rounded once)       │
//! │  FlatDiscount      bill: amount once                                   │
//! │                    product: amount × matching quantity                 │
//! │  FixedSetPrice     every set product present → regular − set price     │
//! │  ThresholdPercent  in-scope qty ≥ min → in-scope subtotal × pct        │
//! │  ThresholdFlat     in-scope qty ≥ min → amount once                    │
//! │                                                                         │
//! │  Every discount is floored at 0.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use katom_core::money::{Money, Percent};
//! use katom_core::promotion::{calculate, CartLine, Promotion, PromotionRule};
//!
//! let promo = Promotion::bill_level("p-1", "Ten off", PromotionRule::PercentDiscount {
//!     percent: Percent::from_whole(10),
//! });
//! let cart = [CartLine::new("latte", 1, Money::from_cents(100_000))];
//!
//! let result = calculate(&promo, &cart, None);
//! assert_eq!(result.discount.cents(), 10_000);
//! assert_eq!(result.final_total.cents(), 90_000);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreResult, ValidationError};
use crate::money::{Money, Percent};
use crate::validation::{validate_non_negative, validate_note, validate_required, validate_unique};

// =============================================================================
// Promotion Kind
// =============================================================================

/// Stored discriminant of a [`PromotionRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionKind {
    Percent,
    Flat,
    Set,
    ThresholdPercent,
    ThresholdFlat,
}

impl PromotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionKind::Percent => "PERCENT",
            PromotionKind::Flat => "FLAT",
            PromotionKind::Set => "SET",
            PromotionKind::ThresholdPercent => "THRESHOLD_PERCENT",
            PromotionKind::ThresholdFlat => "THRESHOLD_FLAT",
        }
    }
}

impl fmt::Display for PromotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Promotion Rule
// =============================================================================

/// How a promotion computes its discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionRule {
    /// Percent off the in-scope subtotal.
    PercentDiscount { percent: Percent },

    /// Fixed amount off. Once per bill, or per matching unit.
    FlatDiscount { amount: Money },

    /// Bundle price when every product of the set is in the cart.
    FixedSetPrice { set_price: Money, regular_price: Money },

    /// Percent off once at least `min_quantity` in-scope units are bought.
    ThresholdPercent { min_quantity: i64, percent: Percent },

    /// Fixed amount off once at least `min_quantity` in-scope units are bought.
    ThresholdFlat { min_quantity: i64, amount: Money },
}

impl PromotionRule {
    pub fn kind(&self) -> PromotionKind {
        match self {
            PromotionRule::PercentDiscount { .. } => PromotionKind::Percent,
            PromotionRule::FlatDiscount { .. } => PromotionKind::Flat,
            PromotionRule::FixedSetPrice { .. } => PromotionKind::Set,
            PromotionRule::ThresholdPercent { .. } => PromotionKind::ThresholdPercent,
            PromotionRule::ThresholdFlat { .. } => PromotionKind::ThresholdFlat,
        }
    }

    /// Checks the rule's own numbers.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            PromotionRule::PercentDiscount { percent } => validate_percent(*percent)?,
            PromotionRule::FlatDiscount { amount } => {
                validate_non_negative("amount", amount.cents())?
            }
            PromotionRule::FixedSetPrice {
                set_price,
                regular_price,
            } => {
                validate_non_negative("set_price", set_price.cents())?;
                validate_non_negative("regular_price", regular_price.cents())?;
            }
            PromotionRule::ThresholdPercent {
                min_quantity,
                percent,
            } => {
                validate_min_quantity(*min_quantity)?;
                validate_percent(*percent)?;
            }
            PromotionRule::ThresholdFlat {
                min_quantity,
                amount,
            } => {
                validate_min_quantity(*min_quantity)?;
                validate_non_negative("amount", amount.cents())?;
            }
        }
        Ok(())
    }

    /// Flattens the rule into its storage columns.
    pub fn to_columns(&self) -> RuleColumns {
        let mut cols = RuleColumns {
            kind: self.kind(),
            ..RuleColumns::default()
        };
        match self {
            PromotionRule::PercentDiscount { percent } => {
                cols.percent_bps = Some(percent.bps() as i64);
            }
            PromotionRule::FlatDiscount { amount } => {
                cols.amount_cents = Some(amount.cents());
            }
            PromotionRule::FixedSetPrice {
                set_price,
                regular_price,
            } => {
                cols.set_price_cents = Some(set_price.cents());
                cols.regular_price_cents = Some(regular_price.cents());
            }
            PromotionRule::ThresholdPercent {
                min_quantity,
                percent,
            } => {
                cols.min_quantity = Some(*min_quantity);
                cols.percent_bps = Some(percent.bps() as i64);
            }
            PromotionRule::ThresholdFlat {
                min_quantity,
                amount,
            } => {
                cols.min_quantity = Some(*min_quantity);
                cols.amount_cents = Some(amount.cents());
            }
        }
        cols
    }

    /// Rebuilds a rule from its storage columns.
    ///
    /// ## Errors
    /// `Required` when a column the kind needs is NULL, `OutOfRange` when the
    /// stored percent does not fit.
    pub fn from_columns(cols: &RuleColumns) -> CoreResult<Self> {
        let rule = match cols.kind {
            PromotionKind::Percent => PromotionRule::PercentDiscount {
                percent: percent_column(cols.percent_bps)?,
            },
            PromotionKind::Flat => PromotionRule::FlatDiscount {
                amount: Money::from_cents(required_column("amount", cols.amount_cents)?),
            },
            PromotionKind::Set => PromotionRule::FixedSetPrice {
                set_price: Money::from_cents(required_column("set_price", cols.set_price_cents)?),
                regular_price: Money::from_cents(required_column(
                    "regular_price",
                    cols.regular_price_cents,
                )?),
            },
            PromotionKind::ThresholdPercent => PromotionRule::ThresholdPercent {
                min_quantity: required_column("min_quantity", cols.min_quantity)?,
                percent: percent_column(cols.percent_bps)?,
            },
            PromotionKind::ThresholdFlat => PromotionRule::ThresholdFlat {
                min_quantity: required_column("min_quantity", cols.min_quantity)?,
                amount: Money::from_cents(required_column("amount", cols.amount_cents)?),
            },
        };
        Ok(rule)
    }
}

fn validate_percent(percent: Percent) -> CoreResult<()> {
    if percent.is_zero() || percent > Percent::HUNDRED {
        return Err(ValidationError::OutOfRange {
            field: "percent_bps".to_string(),
            min: 1,
            max: Percent::HUNDRED.bps() as i64,
        }
        .into());
    }
    Ok(())
}

fn validate_min_quantity(min_quantity: i64) -> CoreResult<()> {
    if min_quantity < 1 {
        return Err(ValidationError::MustBePositive {
            field: "min_quantity".to_string(),
        }
        .into());
    }
    Ok(())
}

fn required_column(field: &str, value: Option<i64>) -> CoreResult<i64> {
    value.ok_or_else(|| {
        ValidationError::Required {
            field: field.to_string(),
        }
        .into()
    })
}

fn percent_column(value: Option<i64>) -> CoreResult<Percent> {
    let bps = required_column("percent_bps", value)?;
    let bps = u32::try_from(bps).map_err(|_| ValidationError::OutOfRange {
        field: "percent_bps".to_string(),
        min: 0,
        max: Percent::HUNDRED.bps() as i64,
    })?;
    Ok(Percent::from_bps(bps))
}

/// Nullable numeric columns of the `promotions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleColumns {
    pub kind: PromotionKind,
    pub percent_bps: Option<i64>,
    pub amount_cents: Option<i64>,
    pub set_price_cents: Option<i64>,
    pub regular_price_cents: Option<i64>,
    pub min_quantity: Option<i64>,
}

impl Default for RuleColumns {
    fn default() -> Self {
        RuleColumns {
            kind: PromotionKind::Percent,
            percent_bps: None,
            amount_cents: None,
            set_price_cents: None,
            regular_price_cents: None,
            min_quantity: None,
        }
    }
}

// =============================================================================
// Promotion
// =============================================================================

/// A promotion definition, ready for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Promotion {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub rule: PromotionRule,
    /// Empty = bill level.
    pub product_ids: Vec<String>,
    pub is_active: bool,
    #[ts(as = "Option<String>")]
    pub starts_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl Promotion {
    /// An always-on bill-level promotion.
    pub fn bill_level(id: impl Into<String>, name: impl Into<String>, rule: PromotionRule) -> Self {
        Promotion {
            id: id.into(),
            store_id: String::new(),
            name: name.into(),
            rule,
            product_ids: Vec::new(),
            is_active: true,
            starts_at: None,
            ends_at: None,
        }
    }

    /// Restricts the promotion to the given products.
    pub fn for_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_ids = products.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    pub fn is_bill_level(&self) -> bool {
        self.product_ids.is_empty()
    }

    /// Active flag set and `now` inside the optional window (inclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |start| start <= now)
            && self.ends_at.map_or(true, |end| now <= end)
    }
}

/// Row shape of the `promotions` table.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PromotionRecord {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub kind: PromotionKind,
    pub percent_bps: Option<i64>,
    pub amount_cents: Option<i64>,
    pub set_price_cents: Option<i64>,
    pub regular_price_cents: Option<i64>,
    pub min_quantity: Option<i64>,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl PromotionRecord {
    /// Combines the row with its product set.
    pub fn into_promotion(self, product_ids: Vec<String>) -> CoreResult<Promotion> {
        let rule = PromotionRule::from_columns(&RuleColumns {
            kind: self.kind,
            percent_bps: self.percent_bps,
            amount_cents: self.amount_cents,
            set_price_cents: self.set_price_cents,
            regular_price_cents: self.regular_price_cents,
            min_quantity: self.min_quantity,
        })?;

        Ok(Promotion {
            id: self.id,
            store_id: self.store_id,
            name: self.name,
            rule,
            product_ids,
            is_active: self.is_active,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        })
    }
}

/// Input for persisting a new promotion.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewPromotion {
    pub name: String,
    pub rule: PromotionRule,
    #[serde(default)]
    pub product_ids: Vec<String>,
    pub branch_ids: Vec<String>,
    #[ts(as = "Option<String>")]
    pub starts_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl NewPromotion {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("name", &self.name)?;
        validate_note("name", &self.name)?;
        self.rule.validate()?;
        validate_unique("product_id", self.product_ids.iter().map(String::as_str))?;
        validate_unique("branch_id", self.branch_ids.iter().map(String::as_str))?;

        // A set price always names its set.
        if matches!(self.rule, PromotionRule::FixedSetPrice { .. }) && self.product_ids.is_empty() {
            return Err(ValidationError::Required {
                field: "product_ids".to_string(),
            }
            .into());
        }

        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            if end < start {
                return Err(ValidationError::InvalidFormat {
                    field: "ends_at".to_string(),
                    reason: "must not be before starts_at".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

// =============================================================================
// Cart & Results
// =============================================================================

/// One cart line as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: Money,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price: Money) -> Self {
        CartLine {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply_quantity(self.quantity)
    }
}

/// Outcome of evaluating one promotion against a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountResult {
    pub promotion_id: String,
    pub promotion_name: String,
    pub kind: PromotionKind,
    pub original_total: Money,
    pub discount: Money,
    pub final_total: Money,
    pub is_applicable: bool,
    /// Applied without staff confirmation (bundles).
    pub auto_applied: bool,
    pub message: Option<String>,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Lines the promotion covers.
fn in_scope<'a>(promotion: &'a Promotion, cart: &'a [CartLine]) -> impl Iterator<Item = &'a CartLine> {
    let set: HashSet<&str> = promotion.product_ids.iter().map(String::as_str).collect();
    let bill_level = promotion.is_bill_level();
    cart.iter()
        .filter(move |line| bill_level || set.contains(line.product_id.as_str()))
}

fn scoped_quantity(promotion: &Promotion, cart: &[CartLine]) -> i64 {
    in_scope(promotion, cart).map(|l| l.quantity).sum()
}

/// In-scope subtotal. Bill level uses `subtotal` so an override applies.
fn scoped_subtotal(promotion: &Promotion, cart: &[CartLine], subtotal: Money) -> Money {
    if promotion.is_bill_level() {
        subtotal
    } else {
        in_scope(promotion, cart).map(CartLine::line_total).sum()
    }
}

fn has_every_set_product(promotion: &Promotion, cart: &[CartLine]) -> bool {
    if promotion.product_ids.is_empty() {
        return false;
    }
    let present: HashSet<&str> = cart
        .iter()
        .filter(|l| l.quantity > 0)
        .map(|l| l.product_id.as_str())
        .collect();
    promotion
        .product_ids
        .iter()
        .all(|id| present.contains(id.as_str()))
}

/// Discount amount for `promotion` over `cart`, never negative.
pub fn evaluate(promotion: &Promotion, cart: &[CartLine], subtotal: Money) -> Money {
    let discount = match &promotion.rule {
        PromotionRule::PercentDiscount { percent } => {
            scoped_subtotal(promotion, cart, subtotal).percent_of(*percent)
        }
        PromotionRule::FlatDiscount { amount } => {
            if promotion.is_bill_level() {
                *amount
            } else {
                amount.multiply_quantity(scoped_quantity(promotion, cart))
            }
        }
        PromotionRule::FixedSetPrice {
            set_price,
            regular_price,
        } => {
            if has_every_set_product(promotion, cart) {
                *regular_price - *set_price
            } else {
                Money::zero()
            }
        }
        PromotionRule::ThresholdPercent {
            min_quantity,
            percent,
        } => {
            if scoped_quantity(promotion, cart) >= *min_quantity {
                scoped_subtotal(promotion, cart, subtotal).percent_of(*percent)
            } else {
                Money::zero()
            }
        }
        PromotionRule::ThresholdFlat {
            min_quantity,
            amount,
        } => {
            if scoped_quantity(promotion, cart) >= *min_quantity {
                *amount
            } else {
                Money::zero()
            }
        }
    };
    discount.floor_zero()
}

/// Sum of line totals.
pub fn cart_subtotal(cart: &[CartLine]) -> Money {
    cart.iter().map(CartLine::line_total).sum()
}

/// Evaluates one promotion and packages the result.
///
/// `subtotal_override` replaces Σ line totals when it is present and non-zero.
pub fn calculate(
    promotion: &Promotion,
    cart: &[CartLine],
    subtotal_override: Option<Money>,
) -> DiscountResult {
    let subtotal = match subtotal_override {
        Some(s) if !s.is_zero() => s,
        _ => cart_subtotal(cart),
    };
    let discount = evaluate(promotion, cart, subtotal);
    let is_applicable = discount.is_positive();

    DiscountResult {
        promotion_id: promotion.id.clone(),
        promotion_name: promotion.name.clone(),
        kind: promotion.rule.kind(),
        original_total: subtotal,
        discount,
        final_total: (subtotal - discount).floor_zero(),
        is_applicable,
        auto_applied: matches!(promotion.rule, PromotionRule::FixedSetPrice { .. }),
        message: (!is_applicable).then(|| "Promotion conditions not met".to_string()),
    }
}

/// Evaluates every promotion active at `now`, keeping those that discount.
pub fn detect(promotions: &[Promotion], cart: &[CartLine], now: DateTime<Utc>) -> Vec<DiscountResult> {
    promotions
        .iter()
        .filter(|p| p.is_active_at(now))
        .map(|p| calculate(p, cart, None))
        .filter(|r| r.discount.is_positive())
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
