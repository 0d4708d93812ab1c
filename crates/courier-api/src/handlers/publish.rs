//! Message publish endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use courier_broker::{BrokerEvent, EmitTarget};
use serde_json::Value;

use crate::{models::*, AppState};

const MISSING_FIELDS: &str = "Missing topic, message_id, message, or producer";

/// Persist a message and fan the body out to the topic room.
pub async fn publish(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<StatusResponse>) {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected publish body");
            return bad_request("Invalid JSON");
        }
    };

    let request: PublishRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(_) => return bad_request(MISSING_FIELDS),
    };
    if !request.missing_fields().is_empty() {
        return bad_request(MISSING_FIELDS);
    }

    let PublishRequest {
        topic: Some(topic),
        message_id: Some(message_id),
        message: Some(message),
        producer: Some(producer),
    } = request
    else {
        return bad_request(MISSING_FIELDS);
    };

    if let Err(e) = state
        .broker
        .save_message(&topic, &message_id, message, &producer)
    {
        if e.is_validation() {
            return bad_request(e.to_string());
        }
        tracing::error!(topic = %topic, message_id = %message_id, error = %e, "Publish failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(StatusResponse::error(e.to_string())),
        );
    }

    state
        .broker
        .emit(BrokerEvent::Message(body), EmitTarget::Room(topic));

    (StatusCode::OK, Json(StatusResponse::ok()))
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<StatusResponse>) {
    (StatusCode::BAD_REQUEST, Json(StatusResponse::error(message)))
}
