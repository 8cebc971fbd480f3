//! # Katom Server Library
//!
//! The command layer of Katom POS: session checks and orchestration over
//! katom-core rules and katom-db units of work, plus the loyalty accrual
//! worker.
//!
//! ## Module Organization
//! ```text
//! katom_server/
//! ├── lib.rs          ◄─── You are here (AppState, tracing setup)
//! ├── config.rs       ◄─── PosConfig: TOML + KATOM_* overrides
//! ├── error.rs        ◄─── ApiError returned by every command
//! ├── session.rs      ◄─── SessionContext (store, branch, staff)
//! ├── worker.rs       ◄─── AccrualProcessor (points outbox)
//! └── commands/
//!     ├── order.rs     ◄─── create, cancel, get, list by shift
//!     ├── shift.rs     ◄─── open, current, summary, close
//!     ├── promotion.rs ◄─── list, calculate, detect
//!     ├── transfer.rs  ◄─── create, withdraw, send, receive, cancel, lookups
//!     └── points.rs    ◄─── balances, redeem, history
//! ```
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  handler ──► commands::order::create_order(&AppState, &Session, req)    │
//! │                │                                                        │
//! │                ├─ session.require_branch() / require_staff()            │
//! │                ├─ katom-core validation + totals (no I/O)               │
//! │                ├─ katom-db create_order_tx (one SQLite transaction)     │
//! │                └─ AccrualHandle::kick() (after commit)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use katom_db::Database;
use tracing_subscriber::EnvFilter;

pub use config::{ConfigError, PosConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use session::SessionContext;
pub use worker::{AccrualHandle, AccrualProcessor};

/// Everything a command needs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    db: Database,
    config: Arc<PosConfig>,
    accrual: Option<AccrualHandle>,
}

impl AppState {
    pub fn new(db: Database, config: PosConfig) -> Self {
        AppState {
            db,
            config: Arc::new(config),
            accrual: None,
        }
    }

    /// Attaches the running accrual worker so commands can kick it.
    pub fn with_accrual(mut self, handle: AccrualHandle) -> Self {
        self.accrual = Some(handle);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &PosConfig {
        &self.config
    }

    /// Wakes the accrual worker if one is attached.
    pub(crate) fn kick_accrual(&self) {
        if let Some(handle) = &self.accrual {
            handle.kick();
        }
    }
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG` wins when set
/// - otherwise `filter` (from `[logging] filter`)
/// - Default: `info,katom=debug,sqlx=warn`
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
