//! Configuration for the loan ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    #[serde(default)]
    pub rocksdb: RocksDBConfig,

    /// Lifecycle engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Notification dispatch configuration
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/loan-ledger"),
            service_name: "loan-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            engine: EngineConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Lifecycle engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Deadline for a whole operation (milliseconds)
    pub operation_timeout_ms: u64,

    /// Maximum wait for a loan's row lock (milliseconds)
    pub lock_timeout_ms: u64,
}

impl EngineConfig {
    /// Operation deadline
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Row lock wait limit
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            lock_timeout_ms: 2_000,
        }
    }
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Bounded queue size; notices beyond it are dropped
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LOAN_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(ms) = std::env::var("LOAN_LEDGER_OPERATION_TIMEOUT_MS") {
            config.engine.operation_timeout_ms = parse_env("LOAN_LEDGER_OPERATION_TIMEOUT_MS", &ms)?;
        }

        if let Ok(ms) = std::env::var("LOAN_LEDGER_LOCK_TIMEOUT_MS") {
            config.engine.lock_timeout_ms = parse_env("LOAN_LEDGER_LOCK_TIMEOUT_MS", &ms)?;
        }

        if let Ok(cap) = std::env::var("LOAN_LEDGER_NOTIFY_QUEUE") {
            config.notifications.queue_capacity = parse_env("LOAN_LEDGER_NOTIFY_QUEUE", &cap)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.engine.operation_timeout_ms == 0 || self.engine.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Engine timeouts must be non-zero".to_string(),
            ));
        }
        // tokio::sync::mpsc panics on a zero-capacity channel
        if self.notifications.queue_capacity == 0 {
            return Err(crate::Error::Config(
                "Notification queue capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T> {
    value
        .parse()
        .map_err(|_| crate::Error::Config(format!("Invalid value for {}: {}", name, value)))
}
