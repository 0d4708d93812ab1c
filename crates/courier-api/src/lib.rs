//! Courier HTTP and WebSocket transport
//!
//! Thin axum layer over [`courier_broker::Broker`]. Producers publish over HTTP,
//! consumers subscribe and acknowledge over a WebSocket, and dashboards read
//! history and the topology graph.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use courier_broker::{Broker, EventBus};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod handlers;
pub mod models;
pub mod shutdown;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    /// Same bus the broker emits into; WebSocket sessions subscribe to it.
    pub events: EventBus,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, events: EventBus) -> Self {
        Self { broker, events }
    }
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/publish", post(handlers::publish::publish))
        .route("/clients", get(handlers::history::list_clients))
        .route("/messages", get(handlers::history::list_messages))
        .route("/consumptions", get(handlers::history::list_consumptions))
        .route("/graph/state", get(handlers::history::graph_state))
        .route("/health", get(handlers::health::health))
        .route("/metrics/batch", get(handlers::health::batch_metrics))
        .route("/ws", get(handlers::websocket::websocket))
        .with_state(state)
        .merge(courier_observability::exporter::create_metrics_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
