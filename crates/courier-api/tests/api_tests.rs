//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use courier_api::{create_router, AppState};
use courier_broker::{BatchConfig, BrokerConfig, BrokerRuntime, EmitTarget, EventBus};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn setup() -> (BrokerRuntime, EventBus, Router) {
    let bus = EventBus::new(64);
    let config = BrokerConfig {
        batch: BatchConfig {
            batch_size: 10,
            flush_interval: Duration::from_millis(20),
            ..Default::default()
        },
        ..Default::default()
    };
    let runtime = BrokerRuntime::start(config, Arc::new(bus.clone()))
        .await
        .unwrap();
    let router = create_router(AppState::new(runtime.broker().clone(), bus.clone()));
    (runtime, bus, router)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_publish_persists_and_fans_out() {
    let (runtime, bus, router) = setup().await;
    let mut events = bus.subscribe();

    let body = json!({
        "topic": "orders",
        "message_id": "m1",
        "message": {"total": 42},
        "producer": "shop"
    });
    let (status, response) = send(&router, post_json("/publish", &body.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({"status": "ok"}));

    let first = events.recv().await.unwrap();
    assert_eq!(first.event.name(), "new_message");
    assert_eq!(first.target, EmitTarget::Broadcast);

    let second = events.recv().await.unwrap();
    assert_eq!(second.event.name(), "message");
    assert_eq!(second.target, EmitTarget::Room("orders".into()));

    assert!(runtime.broker().sync(Duration::from_secs(5)).await);

    let (status, messages) = send(&router, get("/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["message_id"], "m1");
    assert_eq!(messages[0]["message"], json!({"total": 42}));
    assert_eq!(messages[0]["producer"], "shop");

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_publish_rejects_bad_bodies() {
    let (runtime, _bus, router) = setup().await;

    let (status, response) = send(&router, post_json("/publish", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response, json!({"status": "error", "message": "Invalid JSON"}));

    let cases = [
        json!({"message_id": "m1", "message": {"a": 1}, "producer": "shop"}),
        json!({"topic": "", "message_id": "m1", "message": {"a": 1}, "producer": "shop"}),
        json!({"topic": "orders", "message_id": "m1", "message": {}, "producer": "shop"}),
        json!({"topic": "orders", "message_id": "m1", "message": null, "producer": "shop"}),
        json!({"topic": 7, "message_id": "m1", "message": "x", "producer": "shop"}),
        json!({"topic": "orders", "message_id": "m1", "message": 0, "producer": "shop"}),
        json!({"topic": "orders", "message_id": "m1", "message": false, "producer": "shop"}),
    ];
    for case in cases {
        let (status, response) = send(&router, post_json("/publish", &case.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {}", case);
        assert_eq!(response["status"], "error");
        assert_eq!(
            response["message"],
            "Missing topic, message_id, message, or producer"
        );
    }

    assert!(runtime.broker().sync(Duration::from_secs(5)).await);
    let (_, messages) = send(&router, get("/messages")).await;
    assert!(messages.as_array().unwrap().is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_history_and_graph() {
    let (runtime, _bus, router) = setup().await;
    let broker = runtime.broker().clone();

    broker.register_subscription("sid-1", "billing", "orders").unwrap();
    broker
        .save_message("orders", "m1", json!({"total": 1}), "shop")
        .unwrap();
    broker
        .save_consumption("billing", "orders", "m1", json!({"total": 1}))
        .unwrap();
    assert!(broker.sync(Duration::from_secs(5)).await);

    let (status, clients) = send(&router, get("/clients")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(clients[0]["consumer"], "billing");
    assert_eq!(clients[0]["topic"], "orders");

    let (status, consumptions) = send(&router, get("/consumptions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(consumptions.as_array().unwrap().len(), 1);

    let (status, graph) = send(&router, get("/graph/state")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(graph["producers"], json!(["shop"]));
    assert_eq!(graph["consumers"], json!(["billing"]));
    assert_eq!(graph["topics"], json!(["orders"]));

    let links = graph["links"].as_array().unwrap();
    assert!(links.contains(&json!({"source": "orders", "target": "billing", "type": "consume"})));
    assert!(links.contains(&json!({"source": "shop", "target": "orders", "type": "publish"})));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_health_reflects_storage_state() {
    let (runtime, _bus, router) = setup().await;

    let (status, health) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["timestamp"].as_f64().unwrap() > 0.0);

    runtime.shutdown().await;

    let (status, health) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
    assert!(health["error"].is_string());
}

#[tokio::test]
async fn test_batch_metrics_endpoint() {
    let (runtime, _bus, router) = setup().await;
    let broker = runtime.broker().clone();

    for i in 0..12 {
        broker
            .save_message("orders", &format!("m{}", i), json!({"n": i}), "shop")
            .unwrap();
    }
    assert!(broker.sync(Duration::from_secs(5)).await);

    let (status, metrics) = send(&router, get("/metrics/batch")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total_writes"], 12);
    assert!(metrics["flush_by_size"].as_u64().unwrap() >= 1);
    assert_eq!(metrics["buffer_sizes"]["messages"], 0);
    assert!(metrics["buffer_sizes"].get("deletions").is_some());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_prometheus_endpoint() {
    let (runtime, _bus, router) = setup().await;

    let response = router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("courier_writer_queue_depth"));

    runtime.shutdown().await;
}
