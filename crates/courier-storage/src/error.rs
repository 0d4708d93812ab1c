//! Storage Error Types
//!
//! This module defines all error types that can occur in the persistence layer.
//!
//! ## Error Categories
//!
//! ### Write Errors
//! - `Database`: SQLite rejected a statement, a batch or a script
//! - `Closed`: the writer was stopped and no longer accepts tasks
//!
//! ### Startup Errors
//! - `Startup`: the writer connection or schema initialization failed
//! - `ReadinessTimeout`: a bounded wait (`wait_for_ready`, `sync`) expired
//! - `Migration`: a migration script did not apply
//!
//! ### Script Errors
//! - `Script`: a script file could not be read from disk
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, StorageError>`. Write failures that happen inside the writer task
//! never surface here: they are logged and counted, the task is dropped, and the
//! loop moves on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage writer is closed")]
    Closed,

    #[error("Storage startup failed: {0}")]
    Startup(String),

    #[error("Storage not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Failed to read script {}: {source}", path.display())]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Migration error: {0}")]
    Migration(String),
}
