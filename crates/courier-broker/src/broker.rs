//! Broker facade.
//!
//! Entry point for the transport layer. Writes are validated, counted by the
//! load monitor, buffered in the [`BatchAggregator`] and fanned out through the
//! [`EventSink`]. Reads go straight to the storage readers and therefore may
//! lag buffered writes by up to one flush interval.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use courier_storage::{params, FetchMode, Storage};
use serde_json::Value;
use sqlx::Row;

use crate::batch::{BatchAggregator, BatchMetrics};
use crate::error::{BrokerError, Result};
use crate::events::{BrokerEvent, EmitTarget, EventSink};
use crate::load::LoadMonitor;
use crate::operation::{FlushReason, OperationType};
use crate::records::{
    encode_payload, unix_now, ClientBinding, ConsumptionRecord, GraphLink, GraphState, LinkKind,
    MessageRecord, Subscription,
};

const HISTORY_LIMIT: i64 = 100;

const SELECT_CLIENTS: &str =
    "SELECT consumer, topic, connected_at FROM subscriptions ORDER BY connected_at DESC LIMIT ?";
const SELECT_MESSAGES: &str = "SELECT topic, message_id, message, producer, timestamp \
    FROM messages ORDER BY timestamp DESC LIMIT ?";
const SELECT_CONSUMPTIONS: &str = "SELECT consumer, topic, message_id, message, timestamp \
    FROM consumptions ORDER BY timestamp DESC LIMIT ?";
const SELECT_BINDINGS_BY_SID: &str =
    "SELECT consumer, topic FROM subscriptions WHERE sid = ? ORDER BY connected_at DESC";

const SELECT_PRODUCERS: &str = "SELECT DISTINCT producer FROM messages";
const SELECT_CONSUMERS: &str =
    "SELECT DISTINCT consumer FROM subscriptions UNION SELECT DISTINCT consumer FROM consumptions";
const SELECT_TOPICS: &str =
    "SELECT DISTINCT topic FROM messages UNION SELECT DISTINCT topic FROM subscriptions";
const SELECT_CONSUME_LINKS: &str = "SELECT topic, consumer FROM subscriptions";
const SELECT_PUBLISH_LINKS: &str = "SELECT DISTINCT producer, topic FROM messages";

pub struct Broker {
    storage: Storage,
    aggregator: Arc<BatchAggregator>,
    load: Arc<LoadMonitor>,
    events: Arc<dyn EventSink>,
}

impl Broker {
    pub fn new(
        storage: Storage,
        aggregator: Arc<BatchAggregator>,
        load: Arc<LoadMonitor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            storage,
            aggregator,
            load,
            events,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn load_monitor(&self) -> &Arc<LoadMonitor> {
        &self.load
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Upsert the (sid, topic) subscription and announce it.
    pub fn register_subscription(&self, sid: &str, consumer: &str, topic: &str) -> Result<()> {
        require("register_subscription", &[("sid", sid), ("consumer", consumer), ("topic", topic)])?;
        self.load.record_request();

        let connected_at = unix_now();
        self.aggregator.add(
            OperationType::Subscription,
            params![sid, consumer, topic, connected_at],
        )?;

        self.events.emit(
            BrokerEvent::NewClient {
                consumer: consumer.to_string(),
                topic: topic.to_string(),
                connected_at,
            },
            EmitTarget::Broadcast,
        );
        Ok(())
    }

    /// Remove every subscription of `sid`.
    ///
    /// `known` carries the pairs the transport registered for this connection;
    /// when absent they are looked up in storage, which only sees flushed rows.
    /// One `client_disconnected` event is emitted per pair.
    pub async fn unregister_client(
        &self,
        sid: &str,
        known: Option<Vec<ClientBinding>>,
    ) -> Result<Vec<ClientBinding>> {
        require("unregister_client", &[("sid", sid)])?;

        let bindings = match known {
            Some(bindings) => bindings,
            None => self.bindings_for_sid(sid).await?,
        };

        // Pending upserts for this sid must reach the writer before the delete.
        self.aggregator
            .flush(OperationType::Subscription, FlushReason::Manual);
        self.aggregator.add(OperationType::Deletion, params![sid])?;

        let mut seen = BTreeSet::new();
        for binding in &bindings {
            if !seen.insert((binding.consumer.as_str(), binding.topic.as_str())) {
                continue;
            }
            self.events.emit(
                BrokerEvent::ClientDisconnected {
                    consumer: binding.consumer.clone(),
                    topic: binding.topic.clone(),
                },
                EmitTarget::Broadcast,
            );
        }

        tracing::debug!(sid, subscriptions = seen.len(), "Client unregistered");
        Ok(bindings)
    }

    pub fn save_message(
        &self,
        topic: &str,
        message_id: &str,
        message: Value,
        producer: &str,
    ) -> Result<()> {
        require(
            "save_message",
            &[("topic", topic), ("message_id", message_id), ("producer", producer)],
        )?;
        self.load.record_request();

        let timestamp = unix_now();
        self.aggregator.add(
            OperationType::Message,
            params![topic, message_id, encode_payload(&message), producer, timestamp],
        )?;

        self.events.emit(
            BrokerEvent::NewMessage {
                topic: topic.to_string(),
                message_id: message_id.to_string(),
                message,
                producer: producer.to_string(),
                timestamp,
            },
            EmitTarget::Broadcast,
        );
        Ok(())
    }

    pub fn save_consumption(
        &self,
        consumer: &str,
        topic: &str,
        message_id: &str,
        message: Value,
    ) -> Result<()> {
        require(
            "save_consumption",
            &[("consumer", consumer), ("topic", topic), ("message_id", message_id)],
        )?;
        self.load.record_request();

        let timestamp = unix_now();
        self.aggregator.add(
            OperationType::Consumption,
            params![consumer, topic, message_id, encode_payload(&message), timestamp],
        )?;

        self.events.emit(
            BrokerEvent::NewConsumption {
                consumer: consumer.to_string(),
                topic: topic.to_string(),
                message_id: message_id.to_string(),
                message,
                timestamp,
            },
            EmitTarget::Broadcast,
        );
        Ok(())
    }

    /// Emit an event without touching storage.
    pub fn emit(&self, event: BrokerEvent, target: EmitTarget) {
        self.events.emit(event, target);
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn get_clients(&self) -> Result<Vec<Subscription>> {
        let rows = self
            .storage
            .execute_read(SELECT_CLIENTS, &params![HISTORY_LIMIT], FetchMode::All)
            .await?;
        rows.iter()
            .map(|row| Subscription::try_from(row).map_err(BrokerError::from))
            .collect()
    }

    pub async fn get_messages(&self) -> Result<Vec<MessageRecord>> {
        let rows = self
            .storage
            .execute_read(SELECT_MESSAGES, &params![HISTORY_LIMIT], FetchMode::All)
            .await?;
        rows.iter()
            .map(|row| MessageRecord::try_from(row).map_err(BrokerError::from))
            .collect()
    }

    pub async fn get_consumptions(&self) -> Result<Vec<ConsumptionRecord>> {
        let rows = self
            .storage
            .execute_read(SELECT_CONSUMPTIONS, &params![HISTORY_LIMIT], FetchMode::All)
            .await?;
        rows.iter()
            .map(|row| ConsumptionRecord::try_from(row).map_err(BrokerError::from))
            .collect()
    }

    /// Most recent (consumer, topic) registered under `sid`.
    pub async fn get_client_by_sid(&self, sid: &str) -> Result<Option<ClientBinding>> {
        let rows = self
            .storage
            .execute_read(SELECT_BINDINGS_BY_SID, &params![sid], FetchMode::One)
            .await?;
        rows.first()
            .map(|row| ClientBinding::try_from(row))
            .transpose()
            .map_err(BrokerError::from)
    }

    pub async fn get_graph_state(&self) -> Result<GraphState> {
        let producers = self.column(SELECT_PRODUCERS).await?;
        let consumers = self.column(SELECT_CONSUMERS).await?;
        let topics = self.column(SELECT_TOPICS).await?;

        let mut links = self.links(SELECT_CONSUME_LINKS, LinkKind::Consume).await?;
        links.extend(self.links(SELECT_PUBLISH_LINKS, LinkKind::Publish).await?);

        Ok(GraphState {
            producers,
            consumers,
            topics,
            links,
        })
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Writer ready and a trivial read succeeds.
    pub async fn health(&self) -> Result<()> {
        self.storage.health_check().await?;
        Ok(())
    }

    /// Flush every buffer, then wait until the writer applied it.
    pub async fn sync(&self, timeout: Duration) -> bool {
        self.aggregator.force_flush_all();
        self.storage.sync(timeout).await
    }

    pub fn metrics(&self) -> BatchMetrics {
        self.aggregator.metrics()
    }

    pub fn aggregator(&self) -> &Arc<BatchAggregator> {
        &self.aggregator
    }

    async fn bindings_for_sid(&self, sid: &str) -> Result<Vec<ClientBinding>> {
        let rows = self
            .storage
            .execute_read(SELECT_BINDINGS_BY_SID, &params![sid], FetchMode::All)
            .await?;
        rows.iter()
            .map(|row| ClientBinding::try_from(row).map_err(BrokerError::from))
            .collect()
    }

    async fn column(&self, sql: &str) -> Result<Vec<String>> {
        let rows = self.storage.execute_read(sql, &[], FetchMode::All).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(BrokerError::from))
            .collect()
    }

    async fn links(&self, sql: &str, kind: LinkKind) -> Result<Vec<GraphLink>> {
        let rows = self.storage.execute_read(sql, &[], FetchMode::All).await?;
        rows.iter()
            .map(|row| -> Result<GraphLink> {
                Ok(GraphLink {
                    source: row.try_get(0)?,
                    target: row.try_get(1)?,
                    kind,
                })
            })
            .collect()
    }
}

/// Reject empty required fields before anything reaches storage.
fn require(operation: &str, fields: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    tracing::warn!(operation, missing = ?missing, "Rejected write with missing fields");
    Err(BrokerError::Validation(format!(
        "missing {}",
        missing.join(", ")
    )))
}
