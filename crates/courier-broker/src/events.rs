//! Fanout events.
//!
//! The broker emits events to an [`EventSink`]; the transport decides how they
//! reach clients. [`EventBus`] is the in-process sink the WebSocket transport
//! subscribes to.
//!
//! On the wire an event is `{"event": <name>, "data": <payload>}`.

use std::sync::Arc;

use courier_observability::metrics::EVENTS_EMITTED_TOTAL;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BrokerEvent {
    NewClient {
        consumer: String,
        topic: String,
        connected_at: f64,
    },
    ClientDisconnected {
        consumer: String,
        topic: String,
    },
    NewMessage {
        topic: String,
        message_id: String,
        message: Value,
        producer: String,
        timestamp: f64,
    },
    NewConsumption {
        consumer: String,
        topic: String,
        message_id: String,
        message: Value,
        timestamp: f64,
    },
    /// Published body, delivered to the topic room.
    Message(Value),
}

impl BrokerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BrokerEvent::NewClient { .. } => "new_client",
            BrokerEvent::ClientDisconnected { .. } => "client_disconnected",
            BrokerEvent::NewMessage { .. } => "new_message",
            BrokerEvent::NewConsumption { .. } => "new_consumption",
            BrokerEvent::Message(_) => "message",
        }
    }
}

/// Who receives an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitTarget {
    Broadcast,
    /// Sessions joined to this topic
    Room(String),
}

impl EmitTarget {
    pub fn reaches(&self, joined: impl Fn(&str) -> bool) -> bool {
        match self {
            EmitTarget::Broadcast => true,
            EmitTarget::Room(topic) => joined(topic),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: BrokerEvent, target: EmitTarget);
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: BrokerEvent,
    pub target: EmitTarget,
}

/// Broadcast-channel event sink.
///
/// Slow subscribers lose the oldest events rather than blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: BrokerEvent, target: EmitTarget) {
        EVENTS_EMITTED_TOTAL.with_label_values(&[event.name()]).inc();
        // No subscribers is not an error.
        let _ = self.sender.send(Arc::new(Envelope { event, target }));
    }
}
