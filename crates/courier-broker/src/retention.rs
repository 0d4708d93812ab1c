//! Load-gated retention.
//!
//! Every `cleanup_interval` the reaper asks the [`LoadMonitor`] whether the
//! broker is quiet. If it is, one delete per capped table is queued on the
//! writer, keeping the `max_rows` most recent rows. Busy periods skip the cycle
//! entirely so cleanup never competes with traffic.

use std::sync::Arc;

use courier_observability::metrics::{CLEANUP_CYCLES_TOTAL, CLEANUP_FAILURES_TOTAL};
use courier_storage::{params, WriteSink};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::RetentionConfig;
use crate::load::LoadMonitor;

pub const TRIM_SUBSCRIPTIONS: &str = "DELETE FROM subscriptions WHERE rowid IN \
    (SELECT rowid FROM subscriptions ORDER BY connected_at DESC LIMIT -1 OFFSET ?)";

pub const TRIM_MESSAGES: &str = "DELETE FROM messages WHERE rowid IN \
    (SELECT rowid FROM messages ORDER BY timestamp DESC LIMIT -1 OFFSET ?)";

pub const TRIM_CONSUMPTIONS: &str = "DELETE FROM consumptions WHERE rowid IN \
    (SELECT rowid FROM consumptions ORDER BY timestamp DESC LIMIT -1 OFFSET ?)";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CleanupOutcome {
    /// Load was at or above the threshold
    Skipped { requests_per_second: f64 },
    /// Deletes queued and refused by the writer
    Completed { issued: usize, failed: usize },
}

pub struct RetentionReaper {
    config: RetentionConfig,
    sink: Arc<dyn WriteSink>,
    load: Arc<LoadMonitor>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionReaper {
    pub fn new(config: RetentionConfig, sink: Arc<dyn WriteSink>, load: Arc<LoadMonitor>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            sink,
            load,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Run one cleanup cycle now.
    pub fn run_cycle(&self) -> CleanupOutcome {
        let requests_per_second = self.load.requests_per_second();
        if requests_per_second >= self.config.load_threshold {
            CLEANUP_CYCLES_TOTAL.with_label_values(&["skipped"]).inc();
            tracing::debug!(
                requests_per_second,
                threshold = self.config.load_threshold,
                "High load, skipping cleanup"
            );
            return CleanupOutcome::Skipped { requests_per_second };
        }

        let caps = self.config.max_rows;
        let tables = [
            ("subscriptions", TRIM_SUBSCRIPTIONS, caps.subscriptions),
            ("messages", TRIM_MESSAGES, caps.messages),
            ("consumptions", TRIM_CONSUMPTIONS, caps.consumptions),
        ];

        let mut issued = 0;
        let mut failed = 0;
        for (table, sql, max_rows) in tables {
            if max_rows <= 0 {
                continue;
            }
            match self.sink.enqueue(sql, params![max_rows]) {
                Ok(()) => issued += 1,
                Err(e) => {
                    failed += 1;
                    CLEANUP_FAILURES_TOTAL.with_label_values(&[table]).inc();
                    tracing::error!(table, error = %e, "Failed to queue cleanup");
                }
            }
        }

        CLEANUP_CYCLES_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(issued, failed, requests_per_second, "Cleanup cycle completed");
        CleanupOutcome::Completed { issued, failed }
    }

    /// Start the cleanup loop. The first cycle runs one interval after start.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            tracing::warn!("Cleanup loop already running");
            return;
        }

        let reaper = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.cleanup_interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper.run_cycle();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        tracing::info!(
            cleanup_interval_secs = interval.as_secs(),
            threshold = self.config.load_threshold,
            "Retention cleanup started"
        );
    }

    /// Stop the loop. No final cycle runs.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cleanup loop panicked");
            }
            tracing::info!("Retention cleanup stopped");
        }
    }
}
