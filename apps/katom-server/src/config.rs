//! # Server Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KATOM_DB_PATH=/var/lib/katom/katom.db                              │
//! │     KATOM_REVERSE_ON_CANCEL=false                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/katom-pos/katom.toml (Linux)                             │
//! │     ~/Library/Application Support/com.katom.pos/katom.toml (macOS)     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/katom/katom.db"
//! max_connections = 8
//! busy_timeout_secs = 30
//!
//! [loyalty]
//! accrual_enabled = true
//! reverse_on_cancel = true
//! poll_interval_secs = 5
//! batch_size = 50
//! max_attempts = 10
//!
//! [transfers]
//! default_page_size = 20
//! max_page_size = 100
//!
//! [logging]
//! filter = "info,katom=debug,sqlx=warn"
//! ```

use katom_core::transfer::MAX_TRANSFER_PAGE_SIZE;
use katom_db::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default tracing filter when neither `RUST_LOG` nor the file sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,katom=debug,sqlx=warn";

const CONFIG_FILE_NAME: &str = "katom.toml";
const DATABASE_FILE_NAME: &str = "katom.db";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Created on first start.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the SQLite write lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("com", "katom", "pos")
        .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
}
fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// Loyalty accrual settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltySettings {
    /// Queue ACCRUE jobs for member orders.
    #[serde(default = "default_true")]
    pub accrual_enabled: bool,

    /// Queue a REVERSE job when an order with a member is cancelled.
    #[serde(default = "default_true")]
    pub reverse_on_cancel: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Jobs picked up per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Jobs that failed this many times are left for an operator.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
}

fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> i64 {
    50
}
fn default_max_attempts() -> i64 {
    10
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        LoyaltySettings {
            accrual_enabled: true,
            reverse_on_cancel: true,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

fn default_page_size() -> i64 {
    20
}
fn default_max_page_size() -> i64 {
    MAX_TRANSFER_PAGE_SIZE
}

impl Default for TransferSettings {
    fn default() -> Self {
        TransferSettings {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// PosConfig
// =============================================================================

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub loyalty: LoyaltySettings,

    #[serde(default)]
    pub transfers: TransferSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl PosConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, else the platform config dir)
    /// 3. `KATOM_*` environment variables
    ///
    /// A missing file is not an error. An unreadable or malformed one is.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!(?path, "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        info!(?path, "Loading config from file");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Checks values the rest of the server relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.loyalty.batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "loyalty.batch_size must be greater than 0".into(),
            ));
        }
        if self.loyalty.max_attempts <= 0 {
            return Err(ConfigError::Invalid(
                "loyalty.max_attempts must be greater than 0".into(),
            ));
        }
        if self.loyalty.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "loyalty.poll_interval_secs must be greater than 0".into(),
            ));
        }

        let transfers = &self.transfers;
        if !(1..=MAX_TRANSFER_PAGE_SIZE).contains(&transfers.max_page_size) {
            return Err(ConfigError::Invalid(format!(
                "transfers.max_page_size must be between 1 and {}",
                MAX_TRANSFER_PAGE_SIZE
            )));
        }
        if !(1..=transfers.max_page_size).contains(&transfers.default_page_size) {
            return Err(ConfigError::Invalid(
                "transfers.default_page_size must be between 1 and max_page_size".into(),
            ));
        }

        Ok(())
    }

    /// Applies `KATOM_*` overrides read through `var`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("KATOM_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        override_parsed(&var, "KATOM_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&var, "KATOM_DB_BUSY_TIMEOUT_SECS", &mut self.database.busy_timeout_secs);
        override_parsed(&var, "KATOM_ACCRUAL_ENABLED", &mut self.loyalty.accrual_enabled);
        override_parsed(&var, "KATOM_REVERSE_ON_CANCEL", &mut self.loyalty.reverse_on_cancel);
        override_parsed(&var, "KATOM_ACCRUAL_POLL_SECS", &mut self.loyalty.poll_interval_secs);
        override_parsed(&var, "KATOM_ACCRUAL_BATCH_SIZE", &mut self.loyalty.batch_size);
        override_parsed(&var, "KATOM_ACCRUAL_MAX_ATTEMPTS", &mut self.loyalty.max_attempts);
        if let Some(filter) = var("KATOM_LOG") {
            self.logging.filter = filter;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "katom", "pos")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Pool settings for [`katom_db::Database::new`].
    pub fn to_db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_secs(self.database.busy_timeout_secs))
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable environment override"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
