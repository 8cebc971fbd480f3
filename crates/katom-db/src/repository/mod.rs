//! # Repository Module
//!
//! Database repository implementations for Katom POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  Command (katom-server)                                                │
//! │       │                                                                 │
//! │       │  db.orders().create_order_tx(new_order)                        │
//! │       ▼                                                                 │
//! │  OrderRepository                                                       │
//! │  ├── create_order_tx(&self, order)   ← owns the transaction           │
//! │  ├── cancel_order(&self, ...)                                          │
//! │  └── get(&self, id)                                                    │
//! │       │                                                                 │
//! │       │  shares the open transaction with                              │
//! │       ▼                                                                 │
//! │  stock::adjust_in(&mut conn, ..)     ← ledger primitive                │
//! │  accrual::enqueue_in(&mut conn, ..)  ← outbox row                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Rules:                                                                │
//! │  • Repositories hold a pool; `*_in` functions take a connection       │
//! │  • A unit of work is one `pool.begin()` … `commit()`                   │
//! │  • Its first statement writes, so it holds the write lock throughout  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockRepository`](stock::StockRepository) - Stock levels and the movement ledger
//! - [`OrderRepository`](order::OrderRepository) - Order creation and cancellation
//! - [`ShiftRepository`](shift::ShiftRepository) - Shift open/close and drawer totals
//! - [`PromotionRepository`](promotion::PromotionRepository) - Promotion definitions
//! - [`TransferRepository`](transfer::TransferRepository) - Stock transfer state machine
//! - [`PointsRepository`](points::PointsRepository) - Loyalty balances and ledger
//! - [`AccrualRepository`](accrual::AccrualRepository) - Points accrual outbox
//! - [`CatalogRepository`](catalog::CatalogRepository) - Stores, branches, products, customers

pub mod accrual;
pub mod catalog;
pub mod order;
pub mod points;
pub mod promotion;
pub mod shift;
pub mod stock;
pub mod transfer;

/// Generates a new row id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
