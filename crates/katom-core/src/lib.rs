//! # katom-core: Pure Business Logic for Katom POS
//!
//! This crate holds the commerce rules of Katom POS as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Katom POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  katom-server (commands)                        │   │
//! │  │    create_order, close_shift, detect_promotions, send_transfer  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ katom-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │  money   │ │promotion │ │  shift   │ │ transfer │          │   │
//! │  │   │  Money   │ │ evaluate │ │ expected │ │  state   │          │   │
//! │  │   │ Percent  │ │  detect  │ │  cash    │ │ machine  │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │   ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐          │   │
//! │  │   │  types   │ │  order   │ │ loyalty  │ │validation│          │   │
//! │  │   │ catalog  │ │  totals  │ │  points  │ │  rules   │          │   │
//! │  │   │  stock   │ │ payments │ │ accrual  │ │          │          │   │
//! │  │   └──────────┘ └──────────┘ └──────────┘ └──────────┘          │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    katom-db (Database Layer)                    │   │
//! │  │      stock ledger, orders, shifts, transfers, points (SQLite)   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Catalog and stock ledger types
//! - [`money`] - Money and Percent with integer arithmetic
//! - [`order`] - Order rows, create request, totals
//! - [`promotion`] - Promotion rules and the discount engine
//! - [`shift`] - Shift rows and drawer reconciliation
//! - [`transfer`] - Transfer state machine
//! - [`loyalty`] - Points balances, ledger, accrual payloads
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use katom_core::money::{Money, Percent};
//!
//! let subtotal = Money::from_cents(100_000);
//! let discount = subtotal.percent_of(Percent::from_whole(10));
//! assert_eq!((subtotal - discount).cents(), 90_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod loyalty;
pub mod money;
pub mod order;
pub mod promotion;
pub mod shift;
pub mod transfer;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ErrorCategory, ValidationError};
pub use money::{Money, Percent};
pub use order::{Order, OrderItem, OrderReceipt, OrderStatus, Payment, PaymentMethod};
pub use promotion::{Promotion, PromotionKind, PromotionRule};
pub use shift::Shift;
pub use transfer::{StockTransfer, TransferItem, TransferStatus};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single order or transfer.
///
/// ## Business Reason
/// Prevents runaway requests and keeps the write transaction short.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line.
///
/// ## Business Reason
/// Catches typing 1000 instead of 10.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum length of free-text notes and reasons.
pub const MAX_NOTE_LEN: usize = 500;

/// Maximum unit price in minor units (10 billion major units).
///
/// `MAX_PRICE_CENTS × MAX_ITEM_QUANTITY × MAX_CART_ITEMS` stays well inside i64.
pub const MAX_PRICE_CENTS: i64 = 1_000_000_000_000;

/// Maximum single payment in minor units.
pub const MAX_PAYMENT_CENTS: i64 = MAX_PRICE_CENTS * MAX_ITEM_QUANTITY;

/// Maximum tendered payments on one order.
pub const MAX_PAYMENTS: usize = 20;
