//! # Commands
//!
//! Request/response functions exposed to handlers. Each takes the shared
//! [`AppState`](crate::AppState) and the caller's
//! [`SessionContext`](crate::SessionContext), checks the session, and hands
//! the work to katom-db.
//!
//! ## Command Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  order      create_order, cancel_order, get_order, orders_for_shift     │
//! │  shift      open_shift, current_shift, shift_summary, close_shift       │
//! │  promotion  list_promotions, calculate_discount, detect_promotions      │
//! │  transfer   create_transfer, withdraw_goods, send_transfer,             │
//! │             receive_transfer, cancel_transfer, get_transfer,            │
//! │             list_transfers, pending_transfers                           │
//! │  points     point_balances, redeem_points, point_history                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod order;
pub mod points;
pub mod promotion;
pub mod shift;
pub mod transfer;
