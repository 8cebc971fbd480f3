//! # Katom Server Entry Point
//!
//! ## Startup Sequence
//! 1. Load configuration (`--config <path>` or the platform default)
//! 2. Initialize tracing
//! 3. Connect to database & run migrations
//! 4. Spawn the loyalty accrual worker
//! 5. Wait for ctrl-c
//! 6. Stop the worker, close the pool
//!
//! ## Usage
//! ```bash
//! katom-server --config /etc/katom/katom.toml
//! KATOM_DB_PATH=./katom_dev.db RUST_LOG=debug katom-server
//! ```

use std::path::PathBuf;

use katom_db::Database;
use katom_server::{init_tracing, AccrualProcessor, AppState, PosConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path_arg(std::env::args().skip(1));
    let config = PosConfig::load(config_path)?;

    init_tracing(&config.logging.filter);
    info!(db = ?config.database.path, "Starting Katom POS server");

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::new(config.to_db_config()).await?;
    info!("Database connected and migrations applied");

    let (processor, accrual) = AccrualProcessor::new(db.clone(), config.loyalty.clone());
    let worker = tokio::spawn(processor.run());

    let state = AppState::new(db.clone(), config).with_accrual(accrual.clone());
    info!(
        accrual_enabled = state.config().loyalty.accrual_enabled,
        "Server ready, press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    accrual.shutdown().await;
    if let Err(e) = worker.await {
        warn!(error = %e, "Accrual worker did not stop cleanly");
    }

    db.close().await;
    info!("Katom POS server stopped");
    Ok(())
}

fn config_path_arg(mut args: impl Iterator<Item = String>) -> Option<PathBuf> {
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
