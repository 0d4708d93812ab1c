//! Single-writer storage serializer.
//!
//! ## What Does This Do?
//!
//! `WriteSerializer` owns the only connection allowed to mutate the database.
//! Producers hand it write tasks through an unbounded FIFO and return
//! immediately; one background task dequeues and applies them in order.
//!
//! ```text
//! enqueue()        ─┐
//! enqueue_batch()  ─┼─> FIFO ──> writer task ──> SqliteConnection
//! enqueue_script() ─┤                │
//! sync() barrier   ─┘                └─> ready signal (watch)
//! ```
//!
//! ## Lifecycle
//!
//! 1. `new()` creates the queue. Tasks may be enqueued before `start()`.
//! 2. `start()` spawns the writer: open the connection, apply performance
//!    settings (on-disk only), create the base schema when `messages` is absent,
//!    signal ready, then loop.
//! 3. `stop()` closes the queue, waits for the writer to drain what was already
//!    enqueued, and closes the connection. Calling it again is a no-op.
//!
//! ## Failure Semantics
//!
//! - A task that fails is logged and counted; the loop continues with the next
//!   task. Batches and scripts run inside one transaction, so a failure leaves no
//!   partial effect.
//! - A startup failure ends the writer before the ready signal fires, so
//!   `wait_for_ready` returns `false`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_observability::metrics::{WRITER_QUEUE_DEPTH, WRITER_TASKS_TOTAL};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Executor};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::StorageTarget;
use crate::error::{Result, StorageError};
use crate::migrations;
use crate::value::{bind_all, Params};
use crate::WriteSink;

/// Where a multi-statement script comes from.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Path(PathBuf),
    Text(String),
}

impl ScriptSource {
    async fn load(self) -> Result<String> {
        match self {
            ScriptSource::Text(text) => Ok(text),
            ScriptSource::Path(path) => tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| StorageError::Script { path, source }),
        }
    }
}

impl From<PathBuf> for ScriptSource {
    fn from(path: PathBuf) -> Self {
        ScriptSource::Path(path)
    }
}

enum WriteTask {
    Single { sql: String, params: Params },
    Batch { sql: String, rows: Vec<Params> },
    Script(ScriptSource),
    Barrier(oneshot::Sender<()>),
}

impl WriteTask {
    fn kind(&self) -> &'static str {
        match self {
            WriteTask::Single { .. } => "single",
            WriteTask::Batch { .. } => "batch",
            WriteTask::Script(_) => "script",
            WriteTask::Barrier(_) => "barrier",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    applied: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time writer statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct WriterStats {
    pub queue_depth: usize,
    pub applied: u64,
    pub failed: u64,
}

pub struct WriteSerializer {
    target: StorageTarget,
    sender: RwLock<Option<mpsc::UnboundedSender<WriteTask>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<WriteTask>>>,
    ready_tx: Mutex<Option<watch::Sender<bool>>>,
    ready_rx: watch::Receiver<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WriteSerializer {
    pub fn new(target: StorageTarget) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        Self {
            target,
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            ready_tx: Mutex::new(Some(ready_tx)),
            ready_rx,
            handle: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Spawn the writer task. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let receiver = self.receiver.lock().take();
        let ready_tx = self.ready_tx.lock().take();
        let (Some(receiver), Some(ready_tx)) = (receiver, ready_tx) else {
            return Err(StorageError::Startup(
                "storage writer already started".to_string(),
            ));
        };

        let target = self.target.clone();
        let counters = Arc::clone(&self.counters);
        let handle = tokio::spawn(run_writer(target, receiver, ready_tx, counters));
        *self.handle.lock() = Some(handle);

        tracing::debug!(ephemeral = self.target.is_ephemeral(), "Storage writer spawned");
        Ok(())
    }

    /// Close the queue, drain it and close the connection.
    pub async fn stop(&self) {
        let Some(sender) = self.sender.write().take() else {
            tracing::debug!("Storage writer already stopped");
            return;
        };
        drop(sender);

        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Storage writer task panicked");
                }
            }
            None => {
                // Never started: whatever was queued cannot be applied.
                let discarded = self
                    .receiver
                    .lock()
                    .take()
                    .map(|mut rx| {
                        let mut n = 0usize;
                        while rx.try_recv().is_ok() {
                            n += 1;
                        }
                        n
                    })
                    .unwrap_or(0);
                if discarded > 0 {
                    tracing::warn!(discarded, "Storage writer stopped before start, tasks discarded");
                }
            }
        }
    }

    /// Queue one parameterized statement.
    pub fn enqueue(&self, sql: &str, params: Params) -> Result<()> {
        self.send(WriteTask::Single {
            sql: sql.to_string(),
            params,
        })
    }

    /// Queue many parameter tuples for one statement, applied in one transaction.
    pub fn enqueue_batch(&self, sql: &str, rows: Vec<Params>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.send(WriteTask::Batch {
            sql: sql.to_string(),
            rows,
        })
    }

    /// Queue a multi-statement script, applied in one transaction.
    pub fn enqueue_script(&self, script: ScriptSource) -> Result<()> {
        self.send(WriteTask::Script(script))
    }

    /// Wait for the writer to finish startup. `false` on timeout or startup failure.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready_rx.clone();
        let became_ready = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.is_ok())
            .unwrap_or(false);
        became_ready
    }

    /// Wait until every task enqueued before this call has been applied.
    pub async fn sync(&self, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.send(WriteTask::Barrier(tx)).is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            queue_depth: self.counters.pending.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn send(&self, task: WriteTask) -> Result<()> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(StorageError::Closed)?;

        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        WRITER_QUEUE_DEPTH.inc();
        if sender.send(task).is_err() {
            // Writer exited after a fatal startup error.
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            WRITER_QUEUE_DEPTH.dec();
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl WriteSink for WriteSerializer {
    fn enqueue(&self, sql: &str, params: Params) -> Result<()> {
        WriteSerializer::enqueue(self, sql, params)
    }

    fn enqueue_batch(&self, sql: &str, rows: Vec<Params>) -> Result<()> {
        WriteSerializer::enqueue_batch(self, sql, rows)
    }
}

async fn run_writer(
    target: StorageTarget,
    mut receiver: mpsc::UnboundedReceiver<WriteTask>,
    ready_tx: watch::Sender<bool>,
    counters: Arc<Counters>,
) {
    let mut conn = match open_writer(&target).await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error starting storage writer");
            return;
        }
    };

    ready_tx.send_replace(true);
    tracing::info!(ephemeral = target.is_ephemeral(), "Storage writer ready");

    while let Some(task) = receiver.recv().await {
        counters.pending.fetch_sub(1, Ordering::Relaxed);
        WRITER_QUEUE_DEPTH.dec();

        let kind = task.kind();
        let outcome = match task {
            WriteTask::Barrier(done) => {
                let _ = done.send(());
                continue;
            }
            task => apply(&mut conn, task).await,
        };

        match outcome {
            Ok(()) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
                WRITER_TASKS_TOTAL.with_label_values(&[kind, "applied"]).inc();
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                WRITER_TASKS_TOTAL.with_label_values(&[kind, "failed"]).inc();
                tracing::error!(kind, error = %e, "Storage write failed, task dropped");
            }
        }
    }

    ready_tx.send_replace(false);
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "Error closing storage writer connection");
    }
    tracing::info!(
        applied = counters.applied.load(Ordering::Relaxed),
        failed = counters.failed.load(Ordering::Relaxed),
        "Storage writer stopped"
    );
}

async fn open_writer(target: &StorageTarget) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::connect_with(&target.writer_options()).await?;

    if !target.is_ephemeral() {
        log_performance_settings(&mut conn).await;
    }

    migrations::initialize_base_schema(&mut conn).await?;
    Ok(conn)
}

async fn log_performance_settings(conn: &mut SqliteConnection) {
    let journal_mode = sqlx::query_scalar::<_, String>("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await;
    let synchronous = sqlx::query_scalar::<_, i64>("PRAGMA synchronous")
        .fetch_one(&mut *conn)
        .await;

    match (journal_mode, synchronous) {
        (Ok(journal_mode), Ok(synchronous)) => tracing::info!(
            journal_mode = %journal_mode,
            synchronous,
            "Applied storage performance settings"
        ),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not read back storage performance settings")
        }
    }
}

async fn apply(conn: &mut SqliteConnection, task: WriteTask) -> Result<()> {
    match task {
        WriteTask::Single { sql, params } => {
            bind_all(sqlx::query(&sql), &params)
                .execute(&mut *conn)
                .await?;
        }
        WriteTask::Batch { sql, rows } => {
            // Dropping the transaction on error rolls the whole batch back.
            let mut tx = conn.begin().await?;
            for row in &rows {
                bind_all(sqlx::query(&sql), row).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            tracing::debug!(rows = rows.len(), "Applied batch");
        }
        WriteTask::Script(source) => {
            let script = source.load().await?;
            let mut tx = conn.begin().await?;
            (&mut *tx).execute(script.as_str()).await?;
            tx.commit().await?;
        }
        WriteTask::Barrier(done) => {
            let _ = done.send(());
        }
    }
    Ok(())
}
