//! # Error Types
//!
//! Domain-specific error types for katom-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  katom-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule failures                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  katom-db errors (separate crate)                                      │
//! │  └── DbError          - Database failures (wraps CoreError)            │
//! │                                                                         │
//! │  katom-server errors                                                   │
//! │  └── ApiError         - What handlers see (serialized)                 │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Caller       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Categories
//! Every [`CoreError`] belongs to exactly one [`ErrorCategory`]. The category
//! tells a caller whether to fix the input, wait for a state change, top up
//! a resource, or look for a different id.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Category
// =============================================================================

/// Coarse classification of domain failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or missing input. Rejected before any mutation.
    Validation,
    /// The system is not in a state that allows the operation right now.
    PreconditionFailed,
    /// Payment or loyalty balance is short.
    InsufficientResource,
    /// The referenced entity does not exist for this store.
    NotFound,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    // -------------------------------------------------------------------------
    // Preconditions
    // -------------------------------------------------------------------------
    /// The session has not selected a branch yet.
    #[error("No branch selected for this session")]
    BranchNotSelected,

    /// The session has no verified staff member.
    #[error("No staff member identified for this session")]
    StaffNotIdentified,

    /// The branch has no open shift.
    ///
    /// ## When This Occurs
    /// - Creating an order before the morning shift is opened
    /// - Asking for a summary or closing after the shift was closed
    #[error("Branch {branch_id} has no active shift")]
    NoActiveShift { branch_id: String },

    /// The branch already has an open shift.
    ///
    /// ## When This Occurs
    /// - Two terminals press "open shift" at the same time
    /// - Opening again without closing the previous shift
    #[error("Branch {branch_id} already has an open shift")]
    ShiftAlreadyOpen { branch_id: String },

    /// Order is not in a state that allows the requested operation.
    #[error("Order {order_id} is {status}, cannot {operation}")]
    InvalidOrderStatus {
        order_id: String,
        status: String,
        operation: String,
    },

    /// Transfer is not in a state that allows the requested transition.
    ///
    /// ## When This Occurs
    /// ```text
    /// receive() on CREATED   → goods were never sent
    /// receive() on RECEIVED  → already booked into stock
    /// cancel()  on RECEIVED  → stock already moved
    /// send()    on CANCELLED → request was withdrawn
    /// ```
    #[error("Transfer {transfer_id} is {status}, cannot {operation}")]
    InvalidTransferState {
        transfer_id: String,
        status: String,
        operation: String,
    },

    /// Operation must be performed from a different branch.
    #[error("Operation requires branch {expected}, session is on {actual}")]
    BranchMismatch { expected: String, actual: String },

    // -------------------------------------------------------------------------
    // Insufficient resources
    // -------------------------------------------------------------------------
    /// Payments do not cover the order total.
    #[error("Payment {paid} is less than total {total}")]
    InsufficientPayment { total: i64, paid: i64 },

    /// Customer does not hold enough points for the product.
    #[error("Insufficient points: required {required}, available {available}")]
    InsufficientPoints { required: i64, available: i64 },

    // -------------------------------------------------------------------------
    // Not found
    // -------------------------------------------------------------------------
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Promotion not found: {0}")]
    PromotionNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Shift not found: {0}")]
    ShiftNotFound(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns the category used by callers to decide how to react.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::BranchNotSelected
            | CoreError::StaffNotIdentified
            | CoreError::NoActiveShift { .. }
            | CoreError::ShiftAlreadyOpen { .. }
            | CoreError::InvalidOrderStatus { .. }
            | CoreError::InvalidTransferState { .. }
            | CoreError::BranchMismatch { .. } => ErrorCategory::PreconditionFailed,

            CoreError::InsufficientPayment { .. } | CoreError::InsufficientPoints { .. } => {
                ErrorCategory::InsufficientResource
            }

            CoreError::ProductNotFound(_)
            | CoreError::CustomerNotFound(_)
            | CoreError::BranchNotFound(_)
            | CoreError::OrderNotFound(_)
            | CoreError::PromotionNotFound(_)
            | CoreError::TransferNotFound(_)
            | CoreError::ShiftNotFound(_) => ErrorCategory::NotFound,

            CoreError::Validation(_) => ErrorCategory::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any transaction is opened.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Collection exceeds the allowed size.
    #[error("{field} cannot have more than {max} entries")]
    TooMany { field: String, max: usize },

    /// Same value listed twice where it must be unique.
    #[error("{field} '{value}' is listed more than once")]
    Duplicate { field: String, value: String },

    /// Value is not part of the referenced set.
    #[error("{field} '{value}' is not part of {parent}")]
    NotInSet {
        field: String,
        value: String,
        parent: String,
    },

    /// Product cannot be exchanged for points.
    #[error("Product {product_id} is not redeemable")]
    NotRedeemable { product_id: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
