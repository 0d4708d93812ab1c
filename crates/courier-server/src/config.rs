//! Environment configuration
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_FILE` | `:memory:` |
//! | `MAX_ROWS_PER_TABLE` | 5000 |
//! | `MAX_ROWS_SUBSCRIPTIONS`, `MAX_ROWS_MESSAGES`, `MAX_ROWS_CONSUMPTIONS` | `MAX_ROWS_PER_TABLE` |
//! | `CLEANUP_INTERVAL` (seconds) | 30 |
//! | `CLEANUP_MAX_LOAD_THRESHOLD` (requests/s) | 10.0 |
//! | `CLEANUP_LOAD_WINDOW` (seconds) | 60 |
//! | `BATCH_SIZE` | 100 |
//! | `FLUSH_INTERVAL_MS` | 50 |
//! | `MAX_BUFFER_SIZE` | 10000 |
//! | `COURIER_ADDR` | `0.0.0.0:5000` |
//! | `READY_TIMEOUT_SECS` | 10 |
//! | `MIGRATION_TIMEOUT_SECS` | 15 |
//! | `SHUTDOWN_TIMEOUT_SECS` | 30 |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use courier_broker::{BatchConfig, BrokerConfig, RetentionConfig, TableCaps};
use courier_storage::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub broker: BrokerConfig,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);

        let max_rows: i64 = vars.parse("MAX_ROWS_PER_TABLE", 5000)?;
        let max_rows = TableCaps {
            subscriptions: vars.parse("MAX_ROWS_SUBSCRIPTIONS", max_rows)?,
            messages: vars.parse("MAX_ROWS_MESSAGES", max_rows)?,
            consumptions: vars.parse("MAX_ROWS_CONSUMPTIONS", max_rows)?,
        };

        let storage = StorageConfig {
            location: vars.get("DATABASE_FILE").unwrap_or_else(|| ":memory:".to_string()),
            ready_timeout: Duration::from_secs(vars.parse("READY_TIMEOUT_SECS", 10)?),
            sync_timeout: Duration::from_secs(vars.parse("MIGRATION_TIMEOUT_SECS", 15)?),
            ..Default::default()
        };

        let batch = BatchConfig {
            batch_size: vars.parse("BATCH_SIZE", 100)?,
            flush_interval: Duration::from_millis(vars.parse("FLUSH_INTERVAL_MS", 50)?),
            max_buffer_size: vars.parse("MAX_BUFFER_SIZE", 10_000)?,
        };

        let retention = RetentionConfig {
            max_rows,
            cleanup_interval: Duration::from_secs(vars.parse("CLEANUP_INTERVAL", 30)?),
            load_threshold: vars.parse("CLEANUP_MAX_LOAD_THRESHOLD", 10.0)?,
            load_window: Duration::from_secs(vars.parse("CLEANUP_LOAD_WINDOW", 60)?),
        };

        Ok(Self {
            addr: vars.parse("COURIER_ADDR", SocketAddr::from(([0, 0, 0, 0], 5000)))?,
            broker: BrokerConfig {
                storage,
                batch,
                retention,
            },
            shutdown_timeout: Duration::from_secs(vars.parse("SHUTDOWN_TIMEOUT_SECS", 30)?),
        })
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}
