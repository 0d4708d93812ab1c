//! Graceful shutdown for the Courier server
//!
//! ## Features
//!
//! - SIGINT (Ctrl+C) handling
//! - SIGTERM handling (Unix only)
//! - Configurable drain timeout for in-flight requests
//!
//! ## Environment Variables
//!
//! - `SHUTDOWN_TIMEOUT_SECS`: Maximum time to wait for in-flight requests (default: 30)

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    /// Maximum time to wait for in-flight requests to complete
    pub timeout: Duration,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        let timeout_secs = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(30);

        Self::with_timeout(Duration::from_secs(timeout_secs))
    }
}

impl GracefulShutdown {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Shutdown signal type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Received SIGINT (Ctrl+C)
    SigInt,
    /// Received SIGTERM
    SigTerm,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            Self::SigTerm => write!(f, "SIGTERM"),
        }
    }
}

/// Completes when a shutdown signal is received.
///
/// A handler that cannot be installed never fires; the other one still does.
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::SigInt
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        ShutdownSignal::SigTerm
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// Serve `router` until `shutdown` completes, then give in-flight requests up
/// to `config.timeout` to finish.
pub async fn serve_with_shutdown<F>(
    router: axum::Router,
    addr: SocketAddr,
    config: GracefulShutdown,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Courier server listening");
    tracing::info!(timeout = ?config.timeout, "Graceful shutdown timeout");

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = drain_tx.send(());
        })
        .into_future();

    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result?,
        _ = async {
            let _ = drain_rx.await;
            tokio::time::sleep(config.timeout).await;
        } => {
            tracing::warn!(timeout = ?config.timeout, "In-flight requests did not finish in time");
        }
    }

    tracing::info!("Server shut down");
    Ok(())
}
