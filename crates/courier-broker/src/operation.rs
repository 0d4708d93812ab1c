use std::fmt;

use courier_storage::Params;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub const INSERT_MESSAGE: &str =
    "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, ?, ?, ?)";

pub const INSERT_CONSUMPTION: &str =
    "INSERT INTO consumptions (consumer, topic, message_id, message, timestamp) VALUES (?, ?, ?, ?, ?)";

pub const UPSERT_SUBSCRIPTION: &str =
    "INSERT OR REPLACE INTO subscriptions (sid, consumer, topic, connected_at) VALUES (?, ?, ?, ?)";

pub const DELETE_SUBSCRIPTIONS: &str = "DELETE FROM subscriptions WHERE sid = ?";

/// Kind of buffered write. Each kind has its own buffer and statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationType {
    #[serde(rename = "messages")]
    Message,
    #[serde(rename = "consumptions")]
    Consumption,
    #[serde(rename = "subscriptions")]
    Subscription,
    #[serde(rename = "deletions")]
    Deletion,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::Message,
        OperationType::Consumption,
        OperationType::Subscription,
        OperationType::Deletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Message => "messages",
            OperationType::Consumption => "consumptions",
            OperationType::Subscription => "subscriptions",
            OperationType::Deletion => "deletions",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            OperationType::Message => INSERT_MESSAGE,
            OperationType::Consumption => INSERT_CONSUMPTION,
            OperationType::Subscription => UPSERT_SUBSCRIPTION,
            OperationType::Deletion => DELETE_SUBSCRIPTIONS,
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a buffer was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Size,
    Time,
    Shutdown,
    Manual,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Time => "time",
            FlushReason::Shutdown => "shutdown",
            FlushReason::Manual => "manual",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write waiting in a buffer.
#[derive(Debug, Clone)]
pub struct WriteOperation {
    pub operation: OperationType,
    pub params: Params,
    pub enqueued_at: Instant,
}

impl WriteOperation {
    pub fn new(operation: OperationType, params: Params) -> Self {
        Self {
            operation,
            params,
            enqueued_at: Instant::now(),
        }
    }
}
