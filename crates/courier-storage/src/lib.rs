//! Courier Storage
//!
//! Single-writer SQLite persistence for the Courier broker.
//!
//! ## Architecture
//!
//! ```text
//! Broker / BatchAggregator / RetentionReaper
//!        │ enqueue, enqueue_batch          │ execute_read
//!        ▼                                 ▼
//!  WriteSerializer (one connection)   StorageReader (pool)
//!        │                                 │
//!        └──────────────► SQLite ◄─────────┘
//! ```
//!
//! - **Writes** are serialized through [`WriteSerializer`]: one background task
//!   owns the only mutating connection and applies tasks in FIFO order.
//! - **Reads** go straight to [`StorageReader`] and may lag buffered writes.
//! - **Schema** is created by the writer on first start and upgraded by
//!   [`Storage::migrate`] once the writer is ready.
//!
//! ## Usage
//!
//! ```ignore
//! use courier_storage::{params, Storage, StorageConfig};
//!
//! let storage = Storage::open(StorageConfig::on_disk("courier.db"))?;
//! storage.start_and_wait().await?;
//! storage.migrate().await?;
//!
//! storage.execute_write(
//!     "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, ?, ?, ?)",
//!     params!["orders", "m1", "{}", "svc", 1.0],
//! )?;
//! storage.sync(std::time::Duration::from_secs(5)).await;
//!
//! storage.stop().await;
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod reader;
pub mod serializer;
pub mod value;

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub use config::{PerformanceSettings, StorageConfig, StorageTarget};
pub use error::{Result, StorageError};
pub use reader::{FetchMode, StorageReader};
pub use serializer::{ScriptSource, WriteSerializer, WriterStats};
pub use value::{Params, SqlValue};

/// Destination for write tasks.
///
/// Implemented by [`WriteSerializer`]; components that only need to submit
/// writes depend on this trait so they can be exercised without a database.
pub trait WriteSink: Send + Sync {
    fn enqueue(&self, sql: &str, params: Params) -> Result<()>;

    /// All rows are applied in one transaction or not at all.
    fn enqueue_batch(&self, sql: &str, rows: Vec<Params>) -> Result<()>;
}

/// Writer and readers for one database.
#[derive(Clone)]
pub struct Storage {
    writer: Arc<WriteSerializer>,
    reader: StorageReader,
    config: Arc<StorageConfig>,
}

impl Storage {
    /// Build the writer and reader. Nothing is opened until [`Storage::start`].
    pub fn open(config: StorageConfig) -> Result<Self> {
        let target = config.target()?;
        let reader = StorageReader::new(&target);
        let writer = Arc::new(WriteSerializer::new(target));

        Ok(Self {
            writer,
            reader,
            config: Arc::new(config),
        })
    }

    pub fn writer(&self) -> &Arc<WriteSerializer> {
        &self.writer
    }

    pub fn reader(&self) -> &StorageReader {
        &self.reader
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn start(&self) -> Result<()> {
        self.writer.start()
    }

    /// Start the writer and wait up to `ready_timeout` for it.
    pub async fn start_and_wait(&self) -> Result<()> {
        self.start()?;
        if !self.wait_for_ready(self.config.ready_timeout).await {
            return Err(StorageError::ReadinessTimeout(self.config.ready_timeout));
        }
        Ok(())
    }

    /// Drain and stop the writer, then close the readers.
    pub async fn stop(&self) {
        self.writer.stop().await;
        self.reader.close().await;
    }

    pub fn execute_write(&self, sql: &str, params: Params) -> Result<()> {
        self.writer.enqueue(sql, params)
    }

    pub fn execute_write_batch(&self, sql: &str, rows: Vec<Params>) -> Result<()> {
        self.writer.enqueue_batch(sql, rows)
    }

    pub fn execute_script(&self, script: impl Into<ScriptSource>) -> Result<()> {
        self.writer.enqueue_script(script.into())
    }

    pub async fn execute_read(
        &self,
        sql: &str,
        params: &[SqlValue],
        mode: FetchMode,
    ) -> Result<Vec<SqliteRow>> {
        self.reader.execute_read(sql, params, mode).await
    }

    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        self.writer.wait_for_ready(timeout).await
    }

    pub async fn sync(&self, timeout: Duration) -> bool {
        self.writer.sync(timeout).await
    }

    /// Apply every embedded migration not yet recorded in `schema_migrations`.
    ///
    /// Each migration is bounded by `sync_timeout`. Returns how many were applied.
    pub async fn migrate(&self) -> Result<usize> {
        let applied = self.applied_migrations().await?;
        let timeout = self.config.sync_timeout;
        let mut count = 0;

        for migration in migrations::MIGRATIONS {
            if applied.iter().any(|name| name == migration.name) {
                tracing::debug!(migration = migration.name, "Migration already applied");
                continue;
            }

            tracing::info!(migration = migration.name, "Applying migration");
            self.writer
                .enqueue_script(ScriptSource::Text(migration.sql.to_string()))?;

            if !self.writer.sync(timeout).await {
                return Err(StorageError::ReadinessTimeout(timeout));
            }

            if !self
                .applied_migrations()
                .await?
                .iter()
                .any(|name| name == migration.name)
            {
                return Err(StorageError::Migration(format!(
                    "{} was not recorded after sync",
                    migration.name
                )));
            }

            tracing::info!(migration = migration.name, "Migration applied");
            count += 1;
        }

        Ok(count)
    }

    pub async fn applied_migrations(&self) -> Result<Vec<String>> {
        if self
            .reader
            .fetch_optional(migrations::MIGRATION_TABLE_EXISTS, &[])
            .await?
            .is_none()
        {
            return Ok(Vec::new());
        }

        self.reader
            .fetch_all(migrations::APPLIED_MIGRATIONS, &[])
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StorageError::from))
            .collect()
    }

    /// Ready writer plus a successful trivial read.
    pub async fn health_check(&self) -> Result<()> {
        if !self.writer.is_ready() {
            return Err(StorageError::Startup(
                "storage writer is not ready".to_string(),
            ));
        }
        self.reader.ping().await
    }

    pub fn stats(&self) -> WriterStats {
        self.writer.stats()
    }
}
