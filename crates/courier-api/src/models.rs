//! API models for HTTP and WebSocket endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{"status": "ok"}` or `{"status": "error", "message": ...}`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Body of `POST /publish`. Every field is required; `message` is any
/// non-empty JSON value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PublishRequest {
    pub topic: Option<String>,
    pub message_id: Option<String>,
    pub message: Option<Value>,
    pub producer: Option<String>,
}

impl PublishRequest {
    /// Names of missing or empty fields.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(&self.topic) {
            missing.push("topic");
        }
        if is_blank(&self.message_id) {
            missing.push("message_id");
        }
        if self.message.as_ref().map_or(true, is_empty_value) {
            missing.push("message");
        }
        if is_blank(&self.producer) {
            missing.push("producer");
        }
        missing
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthResponse {
    Healthy { status: String, timestamp: f64 },
    Unhealthy { status: String, error: String },
}

/// Frames a WebSocket client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe(SubscribeRequest),
    Consumed(ConsumedRequest),
}

#[derive(Debug, Deserialize, Default)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub consumer: String,
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ConsumedRequest {
    #[serde(default)]
    pub consumer: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub message: Value,
}
