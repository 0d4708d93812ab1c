//! Health and batch metrics endpoints

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use courier_broker::{records::unix_now, BatchMetrics};
use serde::Serialize;

use crate::{models::HealthResponse, AppState};

/// 200 when the writer is ready and a trivial read succeeds, otherwise 503.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.broker.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse::Healthy {
                status: "healthy".to_string(),
                timestamp: unix_now(),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::Unhealthy {
                    status: "unhealthy".to_string(),
                    error: e.to_string(),
                }),
            )
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchMetricsResponse {
    #[serde(flatten)]
    pub metrics: BatchMetrics,
    pub buffer_sizes: BTreeMap<String, usize>,
}

pub async fn batch_metrics(State(state): State<AppState>) -> Json<BatchMetricsResponse> {
    let buffer_sizes = state
        .broker
        .aggregator()
        .buffer_sizes()
        .into_iter()
        .map(|(operation, size)| (operation.to_string(), size))
        .collect();

    Json(BatchMetricsResponse {
        metrics: state.broker.metrics(),
        buffer_sizes,
    })
}
