//! Courier Observability
//!
//! Prometheus metrics for the persistence pipeline and the transport.
//!
//! # Usage
//!
//! ```no_run
//! use courier_observability::{metrics, exporter};
//!
//! // Register every metric with the registry
//! metrics::init();
//!
//! // Serve them on /metrics
//! let metrics_router: axum::Router = exporter::create_metrics_router();
//! ```

pub mod exporter;
pub mod metrics;

pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}
