//! Read-only history and topology endpoints
//!
//! Each list returns at most the 100 most recent rows.

use axum::{extract::State, http::StatusCode, Json};
use courier_broker::{
    BrokerError, ConsumptionRecord, GraphState, MessageRecord, Subscription,
};

use crate::{models::StatusResponse, AppState};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<StatusResponse>)>;

pub async fn list_clients(State(state): State<AppState>) -> ApiResult<Vec<Subscription>> {
    state.broker.get_clients().await.map(Json).map_err(internal)
}

pub async fn list_messages(State(state): State<AppState>) -> ApiResult<Vec<MessageRecord>> {
    state.broker.get_messages().await.map(Json).map_err(internal)
}

pub async fn list_consumptions(
    State(state): State<AppState>,
) -> ApiResult<Vec<ConsumptionRecord>> {
    state
        .broker
        .get_consumptions()
        .await
        .map(Json)
        .map_err(internal)
}

pub async fn graph_state(State(state): State<AppState>) -> ApiResult<GraphState> {
    state
        .broker
        .get_graph_state()
        .await
        .map(Json)
        .map_err(internal)
}

fn internal(e: BrokerError) -> (StatusCode, Json<StatusResponse>) {
    tracing::error!(error = %e, "Read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(StatusResponse::error(e.to_string())),
    )
}
