use lazy_static::lazy_static;
use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Batch Metrics
    // ============================================================================

    /// Writes admitted into a buffer
    pub static ref WRITES_BUFFERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_writes_buffered_total", "Total writes admitted into batch buffers"),
        &["operation"]
    ).expect("metric can be created");

    /// Buffer flushes by trigger
    pub static ref FLUSHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_flushes_total", "Total buffer flushes"),
        &["operation", "reason"] // size, time, shutdown, manual
    ).expect("metric can be created");

    /// Items per flushed batch
    pub static ref BATCH_SIZE: HistogramVec = HistogramVec::new(
        HistogramOpts::new("courier_batch_size", "Flushed batch size in items")
            .buckets(vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0]),
        &["operation"]
    ).expect("metric can be created");

    /// Items lost because their batch could not be handed to the writer
    pub static ref DROPPED_ITEMS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_dropped_items_total", "Total buffered items dropped"),
        &["operation"]
    ).expect("metric can be created");

    // ============================================================================
    // Writer Metrics
    // ============================================================================

    /// Tasks applied by the storage writer
    pub static ref WRITER_TASKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_writer_tasks_total", "Total storage writer tasks"),
        &["kind", "outcome"] // single, batch, script / applied, failed
    ).expect("metric can be created");

    /// Tasks waiting in the writer queue
    pub static ref WRITER_QUEUE_DEPTH: IntGauge = IntGauge::new(
        "courier_writer_queue_depth",
        "Tasks waiting in the storage writer queue"
    ).expect("metric can be created");

    // ============================================================================
    // Retention Metrics
    // ============================================================================

    /// Observed request rate
    pub static ref LOAD_REQUESTS_PER_SECOND: Gauge = Gauge::new(
        "courier_load_requests_per_second",
        "Request rate over the load window"
    ).expect("metric can be created");

    /// Cleanup cycles by outcome
    pub static ref CLEANUP_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_cleanup_cycles_total", "Total retention cleanup cycles"),
        &["outcome"] // completed, skipped
    ).expect("metric can be created");

    /// Per-table cleanup failures
    pub static ref CLEANUP_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_cleanup_failures_total", "Total retention deletes that failed to enqueue"),
        &["table"]
    ).expect("metric can be created");

    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Fanout events emitted
    pub static ref EVENTS_EMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("courier_events_emitted_total", "Total fanout events emitted"),
        &["event"]
    ).expect("metric can be created");

    /// Open WebSocket sessions
    pub static ref WS_SESSIONS_ACTIVE: IntGauge = IntGauge::new(
        "courier_ws_sessions_active",
        "Number of open WebSocket sessions"
    ).expect("metric can be created");
}

/// Initialize metrics registry
/// Can be called multiple times safely (idempotent)
pub fn init() {
    INIT.call_once(|| {
        // Batch metrics
        REGISTRY
            .register(Box::new(WRITES_BUFFERED_TOTAL.clone()))
            .expect("writes_buffered_total can be registered");
        REGISTRY
            .register(Box::new(FLUSHES_TOTAL.clone()))
            .expect("flushes_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_SIZE.clone()))
            .expect("batch_size can be registered");
        REGISTRY
            .register(Box::new(DROPPED_ITEMS_TOTAL.clone()))
            .expect("dropped_items_total can be registered");

        // Writer metrics
        REGISTRY
            .register(Box::new(WRITER_TASKS_TOTAL.clone()))
            .expect("writer_tasks_total can be registered");
        REGISTRY
            .register(Box::new(WRITER_QUEUE_DEPTH.clone()))
            .expect("writer_queue_depth can be registered");

        // Retention metrics
        REGISTRY
            .register(Box::new(LOAD_REQUESTS_PER_SECOND.clone()))
            .expect("load_requests_per_second can be registered");
        REGISTRY
            .register(Box::new(CLEANUP_CYCLES_TOTAL.clone()))
            .expect("cleanup_cycles_total can be registered");
        REGISTRY
            .register(Box::new(CLEANUP_FAILURES_TOTAL.clone()))
            .expect("cleanup_failures_total can be registered");

        // Transport metrics
        REGISTRY
            .register(Box::new(EVENTS_EMITTED_TOTAL.clone()))
            .expect("events_emitted_total can be registered");
        REGISTRY
            .register(Box::new(WS_SESSIONS_ACTIVE.clone()))
            .expect("ws_sessions_active can be registered");
    });
}
