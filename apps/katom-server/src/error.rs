//! # API Error Type
//!
//! The one error type every command returns.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Katom POS                              │
//! │                                                                         │
//! │  Command Function ── Result<T, ApiError>                                │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Validation? ───── CoreError::Validation ────────► VALIDATION_ERROR     │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Precondition? ─── NoActiveShift, BranchMismatch ► PRECONDITION_FAILED  │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Short? ────────── InsufficientPayment/Points ───► INSUFFICIENT_RESOURCE│
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Missing? ──────── ProductNotFound, ... ─────────► NOT_FOUND            │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  SQLite failed? ── DbError::QueryFailed ─────────► PERSISTENCE_FAILURE  │
//! │                    (logged, generic message)        retryable if BUSY   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization
//! ```json
//! {
//!   "code": "PRECONDITION_FAILED",
//!   "message": "Branch b-1 has no active shift",
//!   "retryable": false
//! }
//! ```

use katom_core::{CoreError, ErrorCategory};
use katom_db::DbError;
use serde::Serialize;
use ts_rs::TS;

use crate::config::ConfigError;

/// Error returned from every command.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,

    /// True when the same request may succeed if sent again
    pub retryable: bool,
}

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ErrorCode {
    /// Input validation failed (400)
    ValidationError,

    /// Valid input, wrong moment (409)
    PreconditionFailed,

    /// Payment or points balance is short (422)
    InsufficientResource,

    /// Resource not found (404)
    NotFound,

    /// Database operation failed (500/503)
    PersistenceFailure,

    /// Internal server error (500)
    Internal,
}

impl ApiError {
    /// Creates a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::ValidationError, message)
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCode::Internal, message)
    }

    fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl From<ErrorCategory> for ErrorCode {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Validation => ErrorCode::ValidationError,
            ErrorCategory::PreconditionFailed => ErrorCode::PreconditionFailed,
            ErrorCategory::InsufficientResource => ErrorCode::InsufficientResource,
            ErrorCategory::NotFound => ErrorCode::NotFound,
        }
    }
}

/// Converts core errors to API errors.
impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::new(err.category().into(), err.to_string())
    }
}

/// Converts database errors to API errors.
///
/// Domain failures keep their category. Storage failures are logged in full
/// and surfaced with a generic message.
impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let retryable = err.is_retryable();
        match err {
            DbError::Domain(e) => e.into(),
            DbError::NotFound { entity, id } => {
                ApiError::new(ErrorCode::NotFound, format!("{} not found: {}", entity, id))
            }
            DbError::UniqueViolation { field, value } => ApiError::validation(format!(
                "{} '{}' already exists",
                field, value
            )),
            DbError::ForeignKeyViolation { message } => {
                tracing::error!("Foreign key violation: {}", message);
                ApiError::validation("Invalid reference")
            }
            DbError::Busy(e) => {
                tracing::error!("Database busy: {}", e);
                ApiError::new(ErrorCode::PersistenceFailure, "Database is busy, try again")
                    .retryable(retryable)
            }
            other => {
                tracing::error!(error = %other, "Database operation failed");
                ApiError::new(ErrorCode::PersistenceFailure, "Database operation failed")
                    .retryable(retryable)
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Result type for commands.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Unit Tests
// =============================================================================
