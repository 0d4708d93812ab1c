//! Courier broker server
//!
//! Starts the broker runtime, serves HTTP and WebSocket traffic and, on
//! SIGINT/SIGTERM, stops accepting requests before draining the broker.
//!
//! See [`config`] for the environment variables. `RUST_LOG` controls log
//! verbosity (default: info).

use std::sync::Arc;

use courier_api::shutdown::{serve_with_shutdown, shutdown_signal, GracefulShutdown};
use courier_api::{create_router, AppState};
use courier_broker::{BrokerRuntime, EventBus};

mod config;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        addr = %config.addr,
        database = %config.broker.storage.location,
        batch_size = config.broker.batch.batch_size,
        flush_interval_ms = config.broker.batch.flush_interval.as_millis() as u64,
        "Starting Courier"
    );

    let events = EventBus::default();
    let runtime = BrokerRuntime::start(config.broker, Arc::new(events.clone())).await?;

    let router = create_router(AppState::new(runtime.broker().clone(), events));
    let served = serve_with_shutdown(
        router,
        config.addr,
        GracefulShutdown::with_timeout(config.shutdown_timeout),
        async {
            let signal = shutdown_signal().await;
            tracing::info!(%signal, "Shutdown signal received");
        },
    )
    .await;

    runtime.shutdown().await;
    served
}
