//! Batch Aggregator
//!
//! Buffers writes per operation type and hands them to the storage writer as
//! one transaction per batch.
//!
//! ## Flush Triggers
//!
//! - **size**: a buffer reached `batch_size`, or was full (`max_buffer_size`)
//!   when a new item arrived
//! - **time**: the background loop found a non-empty buffer whose last flush is
//!   at least `flush_interval` old
//! - **shutdown**: `stop()` drains every buffer once the loop has exited
//! - **manual**: `force_flush_all()`
//!
//! ## Locking
//!
//! Every operation type is an independent shard with two locks:
//!
//! ```text
//! handoff ──> buffer
//! ```
//!
//! `add` only takes the buffer lock to push. A flush takes the handoff lock,
//! swaps the buffer out under a brief buffer lock, then submits the batch while
//! still holding the handoff lock. Two flushes of the same type therefore
//! reach the writer in the order their batches were swapped out, which keeps
//! application order equal to enqueue order within a type. Submission is a
//! channel push, never storage I/O.
//!
//! ## Delivery
//!
//! At most once: a batch the writer refuses (it was stopped) is logged,
//! counted in `dropped_items` and discarded.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use courier_observability::metrics::{
    BATCH_SIZE, DROPPED_ITEMS_TOTAL, FLUSHES_TOTAL, WRITES_BUFFERED_TOTAL,
};
use courier_storage::{Params, StorageError, WriteSink};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::BatchConfig;
use crate::operation::{FlushReason, OperationType, WriteOperation};
use crate::records::unix_now;

/// Snapshot of the aggregator counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchMetrics {
    pub total_flushes: u64,
    pub total_writes: u64,
    pub total_batched_items: u64,
    pub flush_by_size: u64,
    pub flush_by_time: u64,
    pub flush_by_shutdown: u64,
    pub flush_by_manual: u64,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub avg_batch_size: f64,
    /// Unix seconds of the last successful flush
    pub last_flush_time: Option<f64>,
    pub failed_flushes: u64,
    pub dropped_items: u64,
}

impl BatchMetrics {
    fn record_write(&mut self) {
        self.total_writes += 1;
    }

    fn record_flush(&mut self, size: usize, reason: FlushReason) {
        self.total_flushes += 1;
        self.total_batched_items += size as u64;

        match reason {
            FlushReason::Size => self.flush_by_size += 1,
            FlushReason::Time => self.flush_by_time += 1,
            FlushReason::Shutdown => self.flush_by_shutdown += 1,
            FlushReason::Manual => self.flush_by_manual += 1,
        }

        if self.min_batch_size == 0 || size < self.min_batch_size {
            self.min_batch_size = size;
        }
        if size > self.max_batch_size {
            self.max_batch_size = size;
        }
        self.avg_batch_size = self.total_batched_items as f64 / self.total_flushes as f64;
        self.last_flush_time = Some(unix_now());
    }

    fn record_failure(&mut self, size: usize) {
        self.failed_flushes += 1;
        self.dropped_items += size as u64;
    }
}

struct Shard {
    buffer: Mutex<Vec<WriteOperation>>,
    handoff: Mutex<()>,
    last_flush: Mutex<Instant>,
}

impl Shard {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            handoff: Mutex::new(()),
            last_flush: Mutex::new(Instant::now()),
        }
    }
}

pub struct BatchAggregator {
    config: BatchConfig,
    sink: Arc<dyn WriteSink>,
    shards: [Shard; 4],
    metrics: Mutex<BatchMetrics>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl BatchAggregator {
    pub fn new(config: BatchConfig, sink: Arc<dyn WriteSink>) -> Self {
        let config = BatchConfig {
            batch_size: config.batch_size.max(1),
            max_buffer_size: config.max_buffer_size.max(1),
            ..config
        };
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            sink,
            shards: [Shard::new(), Shard::new(), Shard::new(), Shard::new()],
            metrics: Mutex::new(BatchMetrics::default()),
            shutdown,
            handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Buffer one write. Rejected once the aggregator is stopped.
    pub fn add(&self, operation: OperationType, params: Params) -> Result<(), StorageError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        let shard = &self.shards[operation.index()];
        let item = WriteOperation::new(operation, params);

        let len = loop {
            let mut buffer = shard.buffer.lock();
            // The shutdown drain takes this lock after `stopped` is set.
            if self.stopped.load(Ordering::Acquire) {
                return Err(StorageError::Closed);
            }
            if buffer.len() < self.config.max_buffer_size {
                buffer.push(item);
                break buffer.len();
            }
            drop(buffer);

            tracing::warn!(
                operation = %operation,
                max_buffer_size = self.config.max_buffer_size,
                "Buffer full, forcing flush"
            );
            self.flush(operation, FlushReason::Size);
        };

        self.metrics.lock().record_write();
        WRITES_BUFFERED_TOTAL
            .with_label_values(&[operation.as_str()])
            .inc();

        if len >= self.config.batch_size {
            self.flush(operation, FlushReason::Size);
        }
        Ok(())
    }

    /// Hand the current buffer of `operation` to the writer.
    ///
    /// Returns the number of items taken out of the buffer.
    pub fn flush(&self, operation: OperationType, reason: FlushReason) -> usize {
        let shard = &self.shards[operation.index()];
        let _handoff = shard.handoff.lock();

        let batch = std::mem::take(&mut *shard.buffer.lock());
        *shard.last_flush.lock() = Instant::now();

        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        let oldest = batch[0].enqueued_at;
        let rows: Vec<Params> = batch.into_iter().map(|op| op.params).collect();

        match self.sink.enqueue_batch(operation.sql(), rows) {
            Ok(()) => {
                self.metrics.lock().record_flush(size, reason);
                FLUSHES_TOTAL
                    .with_label_values(&[operation.as_str(), reason.as_str()])
                    .inc();
                BATCH_SIZE
                    .with_label_values(&[operation.as_str()])
                    .observe(size as f64);
                tracing::debug!(
                    operation = %operation,
                    reason = %reason,
                    batch = size,
                    oldest_ms = oldest.elapsed().as_millis() as u64,
                    "Flushed batch"
                );
            }
            Err(e) => {
                self.metrics.lock().record_failure(size);
                DROPPED_ITEMS_TOTAL
                    .with_label_values(&[operation.as_str()])
                    .inc_by(size as u64);
                tracing::error!(
                    operation = %operation,
                    reason = %reason,
                    batch = size,
                    error = %e,
                    "Failed to flush batch, items dropped"
                );
            }
        }

        size
    }

    pub fn force_flush_all(&self) -> usize {
        OperationType::ALL
            .iter()
            .map(|op| self.flush(*op, FlushReason::Manual))
            .sum()
    }

    /// Flush every non-empty buffer whose last flush is at least `flush_interval` old.
    fn flush_expired(&self) {
        for operation in OperationType::ALL {
            let shard = &self.shards[operation.index()];
            if shard.buffer.lock().is_empty() {
                continue;
            }
            let due = shard.last_flush.lock().elapsed() >= self.config.flush_interval;
            if due {
                self.flush(operation, FlushReason::Time);
            }
        }
    }

    /// Start the background flush loop.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            tracing::warn!("Batch flush loop already running");
            return;
        }

        let aggregator = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let interval = self.config.flush_interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::trace!("Batch flush tick");
                        aggregator.flush_expired();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));

        tracing::info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = interval.as_millis() as u64,
            max_buffer_size = self.config.max_buffer_size,
            "Batch aggregator started"
        );
    }

    /// Stop the loop, then drain every buffer with reason `shutdown`.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Batch flush loop panicked");
            }
        }

        let flushed: usize = OperationType::ALL
            .iter()
            .map(|op| self.flush(*op, FlushReason::Shutdown))
            .sum();

        tracing::info!(flushed, "Batch aggregator stopped");
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.metrics.lock().clone()
    }

    pub fn buffer_sizes(&self) -> BTreeMap<OperationType, usize> {
        OperationType::ALL
            .iter()
            .map(|op| (*op, self.shards[op.index()].buffer.lock().len()))
            .collect()
    }
}
