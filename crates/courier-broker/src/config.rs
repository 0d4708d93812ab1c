//! Broker Configuration
//!
//! ## BatchConfig
//!
//! - **batch_size**: flush a buffer once it holds this many items (default: 100)
//! - **flush_interval**: age after which a non-empty buffer is flushed (default: 50ms)
//! - **max_buffer_size**: hard cap per buffer; a full buffer is flushed before
//!   admitting more (default: 10000)
//!
//! ## RetentionConfig
//!
//! - **max_rows**: rows kept per capped table, most recent first (default: 5000).
//!   A value `<= 0` disables capping for that table.
//! - **cleanup_interval**: time between cleanup cycles (default: 30s)
//! - **load_threshold**: cycles only run below this many requests/s (default: 10.0)
//! - **load_window**: sliding window of the load monitor (default: 60s)
//!
//! ## Usage
//!
//! ```ignore
//! use courier_broker::{BatchConfig, BrokerConfig, RetentionConfig};
//!
//! let config = BrokerConfig {
//!     batch: BatchConfig { batch_size: 10, ..Default::default() },
//!     retention: RetentionConfig::with_max_rows(1000),
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use courier_storage::StorageConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval")]
    pub flush_interval: Duration,

    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

/// Per-table row caps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCaps {
    pub subscriptions: i64,
    pub messages: i64,
    pub consumptions: i64,
}

impl TableCaps {
    pub fn uniform(max_rows: i64) -> Self {
        Self {
            subscriptions: max_rows,
            messages: max_rows,
            consumptions: max_rows,
        }
    }
}

impl Default for TableCaps {
    fn default() -> Self {
        Self::uniform(default_max_rows())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub max_rows: TableCaps,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,

    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,

    #[serde(default = "default_load_window")]
    pub load_window: Duration,
}

impl RetentionConfig {
    pub fn with_max_rows(max_rows: i64) -> Self {
        Self {
            max_rows: TableCaps::uniform(max_rows),
            ..Default::default()
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_rows: TableCaps::default(),
            cleanup_interval: default_cleanup_interval(),
            load_threshold: default_load_threshold(),
            load_window: default_load_window(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_max_buffer_size() -> usize {
    10_000
}

fn default_max_rows() -> i64 {
    5000
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_load_threshold() -> f64 {
    10.0
}

fn default_load_window() -> Duration {
    Duration::from_secs(60)
}
