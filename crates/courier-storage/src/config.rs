//! Storage Configuration
//!
//! ## StorageConfig
//!
//! - **location**: on-disk database file, or `:memory:` for an ephemeral store
//! - **ready_timeout**: bound on waiting for the writer to finish startup (default: 10s)
//! - **sync_timeout**: bound on each migration barrier (default: 15s)
//! - **read_pool_size**: number of read-only connections (default: 8)
//! - **busy_timeout**: how long a connection waits on a locked database (default: 30s)
//! - **performance**: settings applied to on-disk stores only
//!
//! ## Ephemeral mode
//!
//! `:memory:` selects ephemeral mode. The writer connection stays open for the
//! life of the writer and readers attach to the same shared-cache database, so
//! no performance settings are applied (WAL and mmap are meaningless there).
//!
//! ```ignore
//! use courier_storage::StorageConfig;
//!
//! let config = StorageConfig {
//!     location: "./data/courier.db".into(),
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};

use crate::error::Result;

const EPHEMERAL_LOCATION: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file, or `:memory:`
    pub location: String,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: Duration,

    #[serde(default = "default_sync_timeout")]
    pub sync_timeout: Duration,

    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: u32,

    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: Duration,

    #[serde(default)]
    pub performance: PerformanceSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            location: EPHEMERAL_LOCATION.to_string(),
            ready_timeout: default_ready_timeout(),
            sync_timeout: default_sync_timeout(),
            read_pool_size: default_read_pool_size(),
            busy_timeout: default_busy_timeout(),
            performance: PerformanceSettings::default(),
        }
    }
}

impl StorageConfig {
    /// Ephemeral store, mostly for tests.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn on_disk(path: impl Into<PathBuf>) -> Self {
        Self {
            location: path.into().display().to_string(),
            ..Default::default()
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.location == EPHEMERAL_LOCATION || self.location.is_empty()
    }

    /// Resolve the configuration into connection options.
    ///
    /// Must be called once per store: each call for an ephemeral location names
    /// a fresh in-memory database.
    pub fn target(&self) -> Result<StorageTarget> {
        let base = if self.is_ephemeral() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(&self.location)
        };

        Ok(StorageTarget {
            base: base.busy_timeout(self.busy_timeout),
            ephemeral: self.is_ephemeral(),
            performance: self.performance.clone(),
            read_pool_size: self.read_pool_size.max(1),
        })
    }
}

/// Settings applied to the writer connection of an on-disk store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// Page cache size in KiB (64MB default)
    pub cache_size_kib: u32,
    pub page_size: u32,
    /// Memory-mapped I/O window in bytes (256MB default)
    pub mmap_size: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            cache_size_kib: 64_000,
            page_size: 4096,
            mmap_size: 256 * 1024 * 1024,
        }
    }
}

/// Resolved connection options shared by the writer and the readers.
#[derive(Debug, Clone)]
pub struct StorageTarget {
    base: SqliteConnectOptions,
    ephemeral: bool,
    performance: PerformanceSettings,
    read_pool_size: u32,
}

impl StorageTarget {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn read_pool_size(&self) -> u32 {
        if self.ephemeral {
            // Shared-cache readers serialize on table locks anyway.
            1
        } else {
            self.read_pool_size
        }
    }

    pub(crate) fn writer_options(&self) -> SqliteConnectOptions {
        if self.ephemeral {
            return self.base.clone();
        }

        // Negative cache_size is interpreted by SQLite as KiB.
        self.base
            .clone()
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .page_size(self.performance.page_size)
            .pragma("cache_size", format!("-{}", self.performance.cache_size_kib))
            .pragma("mmap_size", self.performance.mmap_size.to_string())
    }

    pub(crate) fn reader_options(&self) -> SqliteConnectOptions {
        if self.ephemeral {
            self.base.clone()
        } else {
            self.base.clone().read_only(true)
        }
    }
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_read_pool_size() -> u32 {
    8
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ephemeral() {
        let config = StorageConfig::default();
        assert!(config.is_ephemeral());
        assert!(config.target().unwrap().is_ephemeral());
    }

    #[test]
    fn test_on_disk_location() {
        let config = StorageConfig::on_disk("/tmp/courier-test.db");
        assert!(!config.is_ephemeral());

        let target = config.target().unwrap();
        assert!(!target.is_ephemeral());
        assert_eq!(target.read_pool_size(), 8);
    }

    #[test]
    fn test_ephemeral_uses_single_reader() {
        let config = StorageConfig {
            read_pool_size: 16,
            ..StorageConfig::ephemeral()
        };
        assert_eq!(config.target().unwrap().read_pool_size(), 1);
    }
}
