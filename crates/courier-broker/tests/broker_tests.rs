//! End-to-end tests for the broker pipeline on a real SQLite store.

use std::sync::Arc;
use std::time::Duration;

use courier_broker::{
    BatchAggregator, BatchConfig, Broker, BrokerConfig, BrokerEvent, BrokerRuntime, ClientBinding,
    CleanupOutcome, EventBus, LinkKind, LoadMonitor, Payload, RetentionConfig, RetentionReaper,
    TableCaps,
};
use courier_storage::{params, FetchMode, Storage, StorageConfig};
use serde_json::json;
use sqlx::Row;
use tokio::sync::broadcast::error::TryRecvError;

const SYNC: Duration = Duration::from_secs(5);

async fn runtime(batch: BatchConfig) -> (BrokerRuntime, EventBus) {
    let bus = EventBus::new(256);
    let config = BrokerConfig {
        storage: StorageConfig::ephemeral(),
        batch,
        ..Default::default()
    };
    let runtime = BrokerRuntime::start(config, Arc::new(bus.clone()))
        .await
        .unwrap();
    (runtime, bus)
}

async fn count(storage: &Storage, table: &str) -> i64 {
    let rows = storage
        .execute_read(&format!("SELECT COUNT(*) FROM {}", table), &[], FetchMode::One)
        .await
        .unwrap();
    rows[0].get::<i64, _>(0)
}

// ============================================================================
// Writes and reads
// ============================================================================

#[tokio::test]
async fn test_message_round_trip() {
    let (runtime, _bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();

    broker
        .save_message("t", "m1", json!({"a": 1}), "p")
        .unwrap();
    assert!(broker.sync(SYNC).await);

    let messages = broker.get_messages().await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "t");
    assert_eq!(messages[0].message_id, "m1");
    assert_eq!(messages[0].producer, "p");
    assert_eq!(messages[0].message, Payload::Json(json!({"a": 1})));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_time_and_size_flushes_persist_everything() {
    let (runtime, _bus) = runtime(BatchConfig {
        batch_size: 10,
        flush_interval: Duration::from_millis(100),
        max_buffer_size: 10_000,
    })
    .await;
    let broker = runtime.broker();

    for i in 0..25 {
        broker
            .save_message("orders", &format!("m{}", i), json!({"n": i}), "svc")
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(broker.storage().sync(SYNC).await);

    assert_eq!(count(broker.storage(), "messages").await, 25);
    let metrics = broker.metrics();
    assert_eq!(metrics.total_writes, 25);
    assert_eq!(metrics.total_batched_items, 25);
    assert!(metrics.total_flushes >= 3);
    assert_eq!(metrics.flush_by_size, 2);
    assert!(metrics.flush_by_time >= 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_persists_buffered_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.db");

    let config = BrokerConfig {
        storage: StorageConfig::on_disk(&path),
        batch: BatchConfig {
            batch_size: 1000,
            flush_interval: Duration::from_secs(3600),
            max_buffer_size: 10_000,
        },
        ..Default::default()
    };
    let runtime = BrokerRuntime::start(config, Arc::new(EventBus::default()))
        .await
        .unwrap();

    for i in 0..137 {
        runtime
            .broker()
            .save_consumption("billing", "orders", &format!("m{}", i), json!(i))
            .unwrap();
    }
    runtime.shutdown().await;

    let storage = Storage::open(StorageConfig::on_disk(&path)).unwrap();
    storage.start_and_wait().await.unwrap();
    assert_eq!(count(&storage, "consumptions").await, 137);
    storage.stop().await;
}

#[tokio::test]
async fn test_invalid_payload_placeholder() {
    let (runtime, _bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();

    broker
        .storage()
        .execute_write(
            "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, ?, ?, ?)",
            params!["t", "bad", "{not json", "p", 1.0],
        )
        .unwrap();
    broker
        .save_consumption("c", "t", "m1", json!("plain text"))
        .unwrap();
    assert!(broker.sync(SYNC).await);

    let messages = broker.get_messages().await.unwrap();
    assert_eq!(
        serde_json::to_value(&messages[0].message).unwrap(),
        json!({"error": "invalid payload", "raw": "{not json"})
    );

    // Strings are stored raw, so they read back as invalid JSON.
    let consumptions = broker.get_consumptions().await.unwrap();
    assert!(consumptions[0].message.is_invalid());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_message_columns_do_not_fail_reads() {
    let (runtime, _bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();

    broker
        .storage()
        .execute_write(
            "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, CAST(X'FFFE' AS TEXT), ?, ?)",
            params!["t", "latin", "p", 1.0],
        )
        .unwrap();
    broker
        .storage()
        .execute_write(
            "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, X'7B7D', ?, ?)",
            params!["t", "blob", "p", 2.0],
        )
        .unwrap();
    broker
        .storage()
        .execute_write(
            "INSERT INTO consumptions (consumer, topic, message_id, message, timestamp) VALUES (?, ?, ?, X'FF', ?)",
            params!["c", "t", "latin", 3.0],
        )
        .unwrap();
    broker.save_message("t", "ok", json!({"n": 1}), "p").unwrap();
    assert!(broker.sync(SYNC).await);

    let messages = broker.get_messages().await.unwrap();
    assert_eq!(messages.len(), 3);
    let by_id = |id: &str| {
        messages
            .iter()
            .find(|m| m.message_id == id)
            .map(|m| serde_json::to_value(&m.message).unwrap())
            .unwrap()
    };
    assert_eq!(
        by_id("latin"),
        json!({"error": "invalid payload", "raw": "\u{fffd}\u{fffd}"})
    );
    assert_eq!(by_id("blob"), json!({}));
    assert_eq!(by_id("ok"), json!({"n": 1}));

    let consumptions = broker.get_consumptions().await.unwrap();
    assert_eq!(consumptions.len(), 1);
    assert!(consumptions[0].message.is_invalid());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_validation_rejects_missing_fields() {
    let (runtime, bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();
    let mut events = bus.subscribe();

    assert!(broker
        .save_message("", "m1", json!({}), "p")
        .unwrap_err()
        .is_validation());
    assert!(broker
        .register_subscription("sid", "  ", "t")
        .unwrap_err()
        .is_validation());
    assert!(broker
        .save_consumption("c", "t", "", json!(null))
        .unwrap_err()
        .is_validation());

    assert_eq!(broker.metrics().total_writes, 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

    runtime.shutdown().await;
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_subscription_lifecycle_and_events() {
    let (runtime, bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();
    let mut events = bus.subscribe();

    broker.register_subscription("sid-1", "billing", "orders").unwrap();
    broker.register_subscription("sid-1", "billing", "refunds").unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Resubscribe refreshes the existing row.
    broker.register_subscription("sid-1", "billing", "orders").unwrap();
    broker.register_subscription("sid-2", "audit", "orders").unwrap();
    assert!(broker.sync(SYNC).await);

    assert_eq!(broker.get_clients().await.unwrap().len(), 3);
    assert_eq!(
        broker.get_client_by_sid("sid-1").await.unwrap(),
        Some(ClientBinding {
            consumer: "billing".into(),
            topic: "orders".into()
        })
    );

    for _ in 0..4 {
        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope.event.name(), "new_client");
    }

    let removed = broker.unregister_client("sid-1", None).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(broker.sync(SYNC).await);

    let mut disconnected = Vec::new();
    for _ in 0..2 {
        match &events.recv().await.unwrap().event {
            BrokerEvent::ClientDisconnected { consumer, topic } => {
                disconnected.push((consumer.clone(), topic.clone()))
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    disconnected.sort();
    assert_eq!(
        disconnected,
        vec![
            ("billing".to_string(), "orders".to_string()),
            ("billing".to_string(), "refunds".to_string())
        ]
    );

    let clients = broker.get_clients().await.unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].consumer, "audit");
    assert_eq!(broker.get_client_by_sid("sid-1").await.unwrap(), None);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unregister_with_known_pairs_beats_buffered_upserts() {
    let (runtime, bus) = runtime(BatchConfig {
        batch_size: 1000,
        flush_interval: Duration::from_secs(3600),
        max_buffer_size: 10_000,
    })
    .await;
    let broker = runtime.broker();

    broker.register_subscription("sid-9", "c", "t").unwrap();
    let mut events = bus.subscribe();

    let known = vec![ClientBinding {
        consumer: "c".into(),
        topic: "t".into(),
    }];
    broker.unregister_client("sid-9", Some(known)).await.unwrap();
    assert!(broker.sync(SYNC).await);

    assert!(broker.get_clients().await.unwrap().is_empty());
    assert_eq!(
        events.recv().await.unwrap().event,
        BrokerEvent::ClientDisconnected {
            consumer: "c".into(),
            topic: "t".into()
        }
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_graph_state() {
    let (runtime, _bus) = runtime(BatchConfig::default()).await;
    let broker = runtime.broker();

    broker.save_message("orders", "m1", json!({}), "shop").unwrap();
    broker.save_message("orders", "m2", json!({}), "shop").unwrap();
    broker.register_subscription("sid-1", "billing", "orders").unwrap();
    broker.save_consumption("audit", "refunds", "r1", json!({})).unwrap();
    assert!(broker.sync(SYNC).await);

    let mut graph = broker.get_graph_state().await.unwrap();
    graph.consumers.sort();
    graph.topics.sort();

    assert_eq!(graph.producers, vec!["shop"]);
    assert_eq!(graph.consumers, vec!["audit", "billing"]);
    assert_eq!(graph.topics, vec!["orders"]);
    assert_eq!(graph.links.len(), 2);
    assert!(graph
        .links
        .iter()
        .any(|l| l.kind == LinkKind::Consume && l.source == "orders" && l.target == "billing"));
    assert!(graph
        .links
        .iter()
        .any(|l| l.kind == LinkKind::Publish && l.source == "shop" && l.target == "orders"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_health_follows_writer() {
    let (runtime, _bus) = runtime(BatchConfig::default()).await;
    let broker = Arc::clone(runtime.broker());

    broker.health().await.unwrap();
    runtime.shutdown().await;
    assert!(broker.health().await.is_err());
}

// ============================================================================
// Retention
// ============================================================================

#[tokio::test]
async fn test_cleanup_caps_tables_under_low_load() {
    let storage = Storage::open(StorageConfig::ephemeral()).unwrap();
    storage.start_and_wait().await.unwrap();

    let load = Arc::new(LoadMonitor::new(Duration::from_secs(60)));
    let aggregator = Arc::new(BatchAggregator::new(
        BatchConfig::default(),
        storage.writer().clone(),
    ));
    let broker = Broker::new(
        storage.clone(),
        Arc::clone(&aggregator),
        Arc::clone(&load),
        Arc::new(EventBus::default()),
    );

    let messages = (0..20)
        .map(|i| params!["orders", format!("m{:02}", i), "{}", "svc", i as f64])
        .collect();
    let consumptions = (0..20)
        .map(|i| params!["billing", "orders", format!("m{:02}", i), "{}", i as f64])
        .collect();
    storage
        .execute_write_batch(
            "INSERT INTO messages (topic, message_id, message, producer, timestamp) VALUES (?, ?, ?, ?, ?)",
            messages,
        )
        .unwrap();
    storage
        .execute_write_batch(
            "INSERT INTO consumptions (consumer, topic, message_id, message, timestamp) VALUES (?, ?, ?, ?, ?)",
            consumptions,
        )
        .unwrap();
    assert!(storage.sync(SYNC).await);

    let config = RetentionConfig {
        max_rows: TableCaps {
            subscriptions: 5,
            messages: 5,
            consumptions: 0,
        },
        load_threshold: 1000.0,
        ..Default::default()
    };
    let reaper = RetentionReaper::new(config, storage.writer().clone(), load);

    assert_eq!(
        reaper.run_cycle(),
        CleanupOutcome::Completed { issued: 2, failed: 0 }
    );
    assert!(storage.sync(SYNC).await);

    assert_eq!(count(&storage, "messages").await, 5);
    assert_eq!(count(&storage, "consumptions").await, 20);

    let kept: Vec<String> = broker
        .get_messages()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.message_id)
        .collect();
    assert_eq!(kept, vec!["m19", "m18", "m17", "m16", "m15"]);

    aggregator.stop().await;
    storage.stop().await;
}
