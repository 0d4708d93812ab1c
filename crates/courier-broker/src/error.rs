//! Broker error types.

use courier_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Required field missing or empty; nothing reached storage.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for BrokerError {
    fn from(e: sqlx::Error) -> Self {
        BrokerError::Storage(StorageError::Database(e))
    }
}

impl BrokerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, BrokerError::Validation(_))
    }
}
