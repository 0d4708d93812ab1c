//! Broker runtime orchestration.
//!
//! ## Startup
//!
//! 1. Start the storage writer and wait up to `ready_timeout` for it
//! 2. Apply pending migrations, each bounded by `sync_timeout`
//! 3. Start the batch flush loop and the retention loop
//!
//! A failure at any step stops whatever was already started and returns the
//! error; the caller treats it as fatal.
//!
//! ## Shutdown
//!
//! Fixed order: retention loop, flush loop plus final drain of every buffer,
//! then the storage writer drains its queue and closes.

use std::sync::Arc;

use courier_storage::{Storage, StorageError, WriteSink};

use crate::batch::BatchAggregator;
use crate::broker::Broker;
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::load::LoadMonitor;
use crate::retention::RetentionReaper;

pub struct BrokerRuntime {
    storage: Storage,
    aggregator: Arc<BatchAggregator>,
    reaper: Arc<RetentionReaper>,
    broker: Arc<Broker>,
}

impl BrokerRuntime {
    pub async fn start(config: BrokerConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        courier_observability::init();

        let storage = Storage::open(config.storage.clone())?;
        storage.start()?;

        let ready_timeout = config.storage.ready_timeout;
        if !storage.wait_for_ready(ready_timeout).await {
            tracing::error!(timeout_secs = ready_timeout.as_secs(), "Storage writer not ready");
            storage.stop().await;
            return Err(StorageError::ReadinessTimeout(ready_timeout).into());
        }

        match storage.migrate().await {
            Ok(applied) => tracing::info!(applied, "Migrations complete"),
            Err(e) => {
                tracing::error!(error = %e, "Migration failed");
                storage.stop().await;
                return Err(e.into());
            }
        }

        let sink: Arc<dyn WriteSink> = storage.writer().clone();
        let load = Arc::new(LoadMonitor::new(config.retention.load_window));

        let aggregator = Arc::new(BatchAggregator::new(config.batch, Arc::clone(&sink)));
        aggregator.start();

        let reaper = Arc::new(RetentionReaper::new(config.retention, sink, Arc::clone(&load)));
        reaper.start();

        let broker = Arc::new(Broker::new(
            storage.clone(),
            Arc::clone(&aggregator),
            load,
            events,
        ));

        tracing::info!("Broker runtime started");
        Ok(Self {
            storage,
            aggregator,
            reaper,
            broker,
        })
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub async fn shutdown(&self) {
        tracing::info!("Shutting down broker runtime");

        self.reaper.stop().await;
        self.aggregator.stop().await;
        self.storage.stop().await;

        let stats = self.storage.stats();
        tracing::info!(
            applied = stats.applied,
            failed = stats.failed,
            "Broker runtime stopped"
        );
    }
}
