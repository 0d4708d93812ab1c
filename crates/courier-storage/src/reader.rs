//! Read path.
//!
//! Reads never touch the writer queue. On-disk stores hand out read-only
//! connections that WAL lets run alongside the writer; ephemeral stores attach
//! to the writer's shared-cache database.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::config::StorageTarget;
use crate::error::Result;
use crate::value::{bind_all, SqlValue};

/// How many rows a read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    All,
    One,
}

#[derive(Debug, Clone)]
pub struct StorageReader {
    pool: SqlitePool,
}

impl StorageReader {
    /// Connections are opened on first use, after the writer created the file.
    pub fn new(target: &StorageTarget) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(target.read_pool_size())
            .connect_lazy_with(target.reader_options());
        Self { pool }
    }

    pub async fn execute_read(
        &self,
        sql: &str,
        params: &[SqlValue],
        mode: FetchMode,
    ) -> Result<Vec<SqliteRow>> {
        let query = bind_all(sqlx::query(sql), params);
        let rows = match mode {
            FetchMode::All => query.fetch_all(&self.pool).await?,
            FetchMode::One => query.fetch_optional(&self.pool).await?.into_iter().collect(),
        };
        Ok(rows)
    }

    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqliteRow>> {
        self.execute_read(sql, params, FetchMode::All).await
    }

    pub async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqliteRow>> {
        Ok(self
            .execute_read(sql, params, FetchMode::One)
            .await?
            .into_iter()
            .next())
    }

    /// Trivial round trip used by health checks.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
