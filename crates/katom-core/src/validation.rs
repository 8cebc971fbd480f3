//! # Validation Module
//!
//! Input validation utilities for Katom POS.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request shape (THIS MODULE)                                  │
//! │  ├── Required fields, ranges, list sizes, duplicates                   │
//! │  └── Runs before any transaction is opened                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Lookups (katom-server commands)                              │
//! │  ├── Product / customer / promotion exist for the store                │
//! │  └── Active shift exists for the branch                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (on_hand >= 0), partial UNIQUE on active shifts             │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use katom_core::validation::{validate_quantity, validate_unique};
//!
//! validate_quantity(5).unwrap();
//! assert!(validate_unique("product_id", ["a", "b", "a"]).is_err());
//! ```

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::{MAX_ITEM_QUANTITY, MAX_NOTE_LEN, MAX_PAYMENT_CENTS, MAX_PRICE_CENTS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Rejects empty or whitespace-only values.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a free-text note (close note, cancel reason, transfer note).
///
/// ## Rules
/// - May be empty
/// - At most MAX_NOTE_LEN characters
pub fn validate_note(field: &str, note: &str) -> ValidationResult<()> {
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NOTE_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
///
/// ```text
/// qty <= 0   → "quantity must be positive"
/// qty > 999  → "quantity must be between 1 and 999"
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price in minor units. Zero is allowed (free items).
///
/// ```rust
/// use katom_core::validation::validate_price_cents;
///
/// assert!(validate_price_cents(1099).is_ok());
/// assert!(validate_price_cents(0).is_ok());
/// assert!(validate_price_cents(-100).is_err());
/// assert!(validate_price_cents(i64::MAX).is_err());
/// ```
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    validate_non_negative("unit_price", cents)?;
    if cents > MAX_PRICE_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "unit_price".to_string(),
            min: 0,
            max: MAX_PRICE_CENTS,
        });
    }
    Ok(())
}

/// Validates a payment amount: positive and at most MAX_PAYMENT_CENTS.
pub fn validate_payment_amount(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "payment amount".to_string(),
        });
    }

    if cents > MAX_PAYMENT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "payment amount".to_string(),
            min: 1,
            max: MAX_PAYMENT_CENTS,
        });
    }

    Ok(())
}

pub fn validate_non_negative(field: &str, value: i64) -> ValidationResult<()> {
    if value < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub fn validate_positive(field: &str, value: i64) -> ValidationResult<()> {
    if value <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Rejects lists longer than `max`.
pub fn validate_line_count(field: &str, len: usize, max: usize) -> ValidationResult<()> {
    if len > max {
        return Err(ValidationError::TooMany {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Rejects the first value that appears twice.
pub fn validate_unique<'a, I>(field: &str, values: I) -> ValidationResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ValidationError::Duplicate {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ```rust
/// use katom_core::validation::validate_uuid;
///
/// assert!(validate_uuid("id", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("id", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    validate_required(field, id)?;

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
