//! WebSocket transport for consumers
//!
//! Each connection gets a fresh sid. Clients send `subscribe` and `consumed`
//! frames; the server pushes broker events, filtered by the topic rooms the
//! session joined. Closing the socket unregisters every (consumer, topic) pair
//! the session registered.

use std::collections::HashSet;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use courier_broker::{Broker, ClientBinding, Envelope, Result as BrokerResult};
use courier_observability::metrics::WS_SESSIONS_ACTIVE;
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::{models::ClientFrame, AppState};

/// Upgrade HTTP to a consumer WebSocket
pub async fn websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let mut session = Session::new(uuid::Uuid::new_v4().to_string());
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();

    WS_SESSIONS_ACTIVE.inc();
    tracing::info!(sid = %session.sid, "WebSocket session opened");

    loop {
        tokio::select! {
            envelope = events.recv() => {
                let envelope = match envelope {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(sid = %session.sid, skipped, "Session lagging, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(frame) = session.render(&envelope) else {
                    continue;
                };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_frame(&state.broker, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    session.close(&state.broker).await;
    WS_SESSIONS_ACTIVE.dec();
}

/// Per-connection state: joined rooms and registered pairs.
#[derive(Debug)]
pub struct Session {
    pub sid: String,
    rooms: HashSet<String>,
    bindings: Vec<ClientBinding>,
}

impl Session {
    pub fn new(sid: String) -> Self {
        Self {
            sid,
            rooms: HashSet::new(),
            bindings: Vec::new(),
        }
    }

    pub fn rooms(&self) -> &HashSet<String> {
        &self.rooms
    }

    pub fn bindings(&self) -> &[ClientBinding] {
        &self.bindings
    }

    /// Serialized frame for `envelope`, or `None` if this session is not a recipient.
    pub fn render(&self, envelope: &Envelope) -> Option<String> {
        if !envelope.target.reaches(|topic| self.rooms.contains(topic)) {
            return None;
        }
        match serde_json::to_string(&envelope.event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(event = envelope.event.name(), error = %e, "Failed to encode event");
                None
            }
        }
    }

    /// Apply one client frame. Bad frames are logged and ignored.
    pub async fn handle_frame(&mut self, broker: &Broker, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(sid = %self.sid, error = %e, "Ignoring malformed frame");
                return;
            }
        };

        let result = match frame {
            ClientFrame::Subscribe(req) => self.subscribe(broker, &req.consumer, &req.topics),
            ClientFrame::Consumed(req) => {
                broker.save_consumption(&req.consumer, &req.topic, &req.message_id, req.message)
            }
        };

        if let Err(e) = result {
            tracing::warn!(sid = %self.sid, error = %e, "Frame rejected");
        }
    }

    fn subscribe(
        &mut self,
        broker: &Broker,
        consumer: &str,
        topics: &[String],
    ) -> BrokerResult<()> {
        for topic in topics {
            broker.register_subscription(&self.sid, consumer, topic)?;
            self.rooms.insert(topic.clone());

            let binding = ClientBinding {
                consumer: consumer.to_string(),
                topic: topic.clone(),
            };
            if !self.bindings.contains(&binding) {
                self.bindings.push(binding);
            }
        }
        Ok(())
    }

    /// Unregister the sid with the pairs this session registered.
    pub async fn close(self, broker: &Broker) {
        if self.bindings.is_empty() {
            tracing::info!(sid = %self.sid, "WebSocket session closed");
            return;
        }

        match broker.unregister_client(&self.sid, Some(self.bindings)).await {
            Ok(bindings) => {
                tracing::info!(sid = %self.sid, subscriptions = bindings.len(), "WebSocket session closed")
            }
            Err(e) => tracing::error!(sid = %self.sid, error = %e, "Failed to unregister session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_broker::{BrokerConfig, BrokerEvent, BrokerRuntime, EmitTarget, EventBus};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn runtime() -> (BrokerRuntime, EventBus) {
        let bus = EventBus::new(64);
        let runtime = BrokerRuntime::start(BrokerConfig::default(), Arc::new(bus.clone()))
            .await
            .unwrap();
        (runtime, bus)
    }

    #[tokio::test]
    async fn test_subscribe_frame_joins_rooms() {
        let (runtime, _bus) = runtime().await;
        let broker = runtime.broker().clone();
        let mut session = Session::new("sid-1".to_string());

        session
            .handle_frame(
                &broker,
                r#"{"event":"subscribe","data":{"consumer":"billing","topics":["orders","refunds","orders"]}}"#,
            )
            .await;

        assert!(session.rooms().contains("orders"));
        assert!(session.rooms().contains("refunds"));
        assert_eq!(session.bindings().len(), 2);

        assert!(broker.sync(Duration::from_secs(5)).await);
        let clients = broker.get_clients().await.unwrap();
        assert_eq!(clients.len(), 2);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_consumed_frame_records_consumption() {
        let (runtime, _bus) = runtime().await;
        let broker = runtime.broker().clone();
        let mut session = Session::new("sid-2".to_string());

        session
            .handle_frame(
                &broker,
                r#"{"event":"consumed","data":{"consumer":"billing","topic":"orders","message_id":"m1","message":{"total":3}}}"#,
            )
            .await;
        session.handle_frame(&broker, "not json").await;

        assert!(broker.sync(Duration::from_secs(5)).await);
        let consumptions = broker.get_consumptions().await.unwrap();
        assert_eq!(consumptions.len(), 1);
        assert_eq!(consumptions[0].message_id, "m1");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_render_filters_rooms() {
        let (runtime, _bus) = runtime().await;
        let broker = runtime.broker().clone();
        let mut session = Session::new("sid-3".to_string());
        session
            .handle_frame(
                &broker,
                r#"{"event":"subscribe","data":{"consumer":"billing","topics":["orders"]}}"#,
            )
            .await;

        let joined = Envelope {
            event: BrokerEvent::Message(json!({"n": 1})),
            target: EmitTarget::Room("orders".into()),
        };
        let other = Envelope {
            event: BrokerEvent::Message(json!({"n": 2})),
            target: EmitTarget::Room("audit".into()),
        };

        let frame = session.render(&joined).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&frame).unwrap(),
            json!({"event": "message", "data": {"n": 1}})
        );
        assert!(session.render(&other).is_none());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_unregisters_and_announces() {
        let (runtime, bus) = runtime().await;
        let broker = runtime.broker().clone();
        let mut session = Session::new("sid-4".to_string());
        session
            .handle_frame(
                &broker,
                r#"{"event":"subscribe","data":{"consumer":"billing","topics":["orders"]}}"#,
            )
            .await;

        let mut events = bus.subscribe();
        session.close(&broker).await;

        let envelope = events.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            BrokerEvent::ClientDisconnected {
                consumer: "billing".into(),
                topic: "orders".into()
            }
        );

        assert!(broker.sync(Duration::from_secs(5)).await);
        assert!(broker.get_clients().await.unwrap().is_empty());

        runtime.shutdown().await;
    }
}
