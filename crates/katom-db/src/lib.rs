//! # katom-db: Database Layer for Katom POS
//!
//! Database access for the Katom POS commerce core: the stock ledger,
//! orders, shifts, transfers and loyalty points. SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Katom POS Data Flow                              │
//! │                                                                         │
//! │  katom-server command (create_order)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     katom-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StockRepo     │    │ 001_initial  │  │   │
//! │  │   │ SqlitePool    │◄───│ OrderRepo     │    │ 002_orders   │  │   │
//! │  │   │ busy_timeout  │    │ ShiftRepo ... │    │ 003_transfer │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  │   ~/.local/share/pos/katom.db                                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (stock, order, shift, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use katom_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/katom.db")).await?;
//!
//! let shift = db.shifts().open(&store_id, &branch_id, &staff_id, 100_000).await?;
//! let receipt = db.orders().create_order_tx(&order).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::accrual::{AccrualRepository, NewAccrualJob};
pub use repository::catalog::{CatalogRepository, NewProduct};
pub use repository::order::{NewOrder, OrderRepository};
pub use repository::points::PointsRepository;
pub use repository::promotion::PromotionRepository;
pub use repository::shift::ShiftRepository;
pub use repository::stock::StockRepository;
pub use repository::transfer::TransferRepository;
