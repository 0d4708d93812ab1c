//! Rows returned by the broker read path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Current time as fractional unix seconds, the unit of every time column.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Stored payload text decoded back into JSON.
///
/// Serializes as the decoded value itself, or as
/// `{"error": "invalid payload", "raw": <text>}` when the text is not JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Invalid { error: &'static str, raw: String },
}

impl Payload {
    pub fn decode(text: &str) -> Self {
        if text.is_empty() {
            return Payload::Json(Value::Object(Default::default()));
        }
        match serde_json::from_str(text) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Invalid {
                error: "invalid payload",
                raw: text.to_string(),
            },
        }
    }

    /// Decode raw column bytes. Text that is not UTF-8, or any blob that is
    /// not UTF-8 JSON, becomes the invalid placeholder.
    pub fn decode_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::decode(text),
            Err(_) => Payload::Invalid {
                error: "invalid payload",
                raw: String::from_utf8_lossy(bytes).into_owned(),
            },
        }
    }

    /// Read the `message` column of `row` without failing on its storage class.
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let bytes: Option<Vec<u8>> = row.try_get_unchecked("message")?;
        Ok(Self::decode_bytes(bytes.as_deref().unwrap_or_default()))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Payload::Invalid { .. })
    }
}

/// Text stored for a payload: strings as-is, anything else as compact JSON.
pub fn encode_payload(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub consumer: String,
    pub topic: String,
    pub connected_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRecord {
    pub topic: String,
    pub message_id: String,
    pub message: Payload,
    pub producer: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumptionRecord {
    pub consumer: String,
    pub topic: String,
    pub message_id: String,
    pub message: Payload,
    pub timestamp: f64,
}

/// A (consumer, topic) pair registered under one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientBinding {
    pub consumer: String,
    pub topic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Consume,
    Publish,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphState {
    pub producers: Vec<String>,
    pub consumers: Vec<String>,
    pub topics: Vec<String>,
    pub links: Vec<GraphLink>,
}

impl TryFrom<&SqliteRow> for Subscription {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            consumer: row.try_get("consumer")?,
            topic: row.try_get("topic")?,
            connected_at: row.try_get("connected_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for MessageRecord {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            topic: row.try_get("topic")?,
            message_id: row.try_get("message_id")?,
            message: Payload::from_row(row)?,
            producer: row.try_get("producer")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl TryFrom<&SqliteRow> for ConsumptionRecord {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            consumer: row.try_get("consumer")?,
            topic: row.try_get("topic")?,
            message_id: row.try_get("message_id")?,
            message: Payload::from_row(row)?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

impl TryFrom<&SqliteRow> for ClientBinding {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            consumer: row.try_get("consumer")?,
            topic: row.try_get("topic")?,
        })
    }
}
