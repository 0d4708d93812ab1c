//! Embedded schema migrations.
//!
//! `001_initial_schema` is applied by the writer itself during startup when the
//! `messages` table is missing. Every later migration goes through the normal
//! write path (`enqueue_script` followed by `sync`) once the writer is ready;
//! see [`Storage::migrate`](crate::Storage::migrate).
//!
//! Each script records itself in `schema_migrations` as its last statement, so
//! the record and the schema change commit in the same transaction.

use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Executor};

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const INITIAL_SCHEMA: Migration = Migration {
    name: "001_initial_schema",
    sql: include_str!("../migrations/001_initial_schema.sql"),
};

/// Migrations applied after startup, in order.
pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "002_retention_indexes",
    sql: include_str!("../migrations/002_retention_indexes.sql"),
}];

pub(crate) const APPLIED_MIGRATIONS: &str = "SELECT name FROM schema_migrations ORDER BY name";

pub(crate) const MIGRATION_TABLE_EXISTS: &str =
    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'";

/// Create the base schema when `messages` does not exist yet.
///
/// Returns whether the schema was created.
pub(crate) async fn initialize_base_schema(conn: &mut SqliteConnection) -> Result<bool> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'messages'",
    )
    .fetch_optional(&mut *conn)
    .await?;

    if existing.is_some() {
        tracing::debug!("Base table present, skipping initial schema");
        return Ok(false);
    }

    tracing::info!(migration = INITIAL_SCHEMA.name, "Base table not found, creating schema");
    let mut tx = conn.begin().await?;
    (&mut *tx).execute(INITIAL_SCHEMA.sql).await?;
    tx.commit().await?;

    Ok(true)
}
