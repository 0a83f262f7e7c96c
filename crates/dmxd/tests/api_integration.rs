//! End-to-end REST pipeline tests against a bound ephemeral `TcpListener`,
//! exercising the seed scenarios from the ingest-to-output specification:
//! patch + snapshot, the ETag/304 contract, and the rate limiter.

use dashmap::DashMap;
use dmxd::api::build_router;
use dmxd::engine::{DMXEngine, Deduper, RateLimiter};
use dmxd::fade::FadeEngine;
use dmxd::ingress::{IngressRouter, NullFixtureResolver};
use dmxd::metrics::MetricsRegistry;
use dmxd::output::NullBackend;
use dmxd::ws::WsHub;
use serde_json::{json, Value};
use std::sync::Arc;

async fn spawn_test_server() -> String {
    spawn_test_server_with_bus(true).await
}

async fn spawn_test_server_with_bus(bus_connected: bool) -> String {
    let engine = Arc::new(DMXEngine::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let fade = Arc::new(FadeEngine::new(engine.clone(), metrics.clone(), 44));

    let router = Arc::new(IngressRouter {
        engine,
        fade,
        dedupe: Arc::new(Deduper::new(1000, 30, None)),
        limiter: Arc::new(RateLimiter::new(60)),
        metrics,
        ws_hub: Arc::new(WsHub::new()),
        outputs: Arc::new(DashMap::new()),
        fixtures: Arc::new(NullFixtureResolver),
        ws_send_timeout_ms: 200,
        ws_bearer_token: None,
        output_backend: Arc::new(NullBackend),
        output_fps: 40.0,
        bus_connected: Arc::new(std::sync::atomic::AtomicBool::new(bus_connected)),
    });

    let app = build_router(router);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn patch_then_snapshot_scenario() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let ack: Value = client
        .post(format!("{base}/command"))
        .json(&json!({
            "type": "dmx.patch",
            "id": "A",
            "universe": 0,
            "items": [{"ch": 1, "val": 10}, {"ch": 2, "val": 20}, {"ch": 3, "val": 30}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack["accepted"], true);

    let state: Value = client.get(format!("{base}/state")).send().await.unwrap().json().await.unwrap();
    assert_eq!(state["rev"], 1);
    let universe0 = &state["universes"]["0"];
    assert_eq!(universe0[0], 10);
    assert_eq!(universe0[1], 20);
    assert_eq!(universe0[2], 30);
}

#[tokio::test]
async fn snapshot_etag_returns_304_when_unchanged() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/command"))
        .json(&json!({"type": "dmx.patch", "id": "A", "universe": 0, "items": [{"ch": 1, "val": 5}]}))
        .send()
        .await
        .unwrap();

    let first = client.get(format!("{base}/state")).send().await.unwrap();
    let etag = first.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert!(etag.starts_with("W/\"rev-"));

    let second = client
        .get(format!("{base}/state"))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::NOT_MODIFIED);

    client
        .post(format!("{base}/command"))
        .json(&json!({"type": "dmx.patch", "id": "B", "universe": 0, "items": [{"ch": 2, "val": 9}]}))
        .send()
        .await
        .unwrap();

    let third = client
        .get(format!("{base}/state"))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(third.status(), reqwest::StatusCode::OK);
    let new_etag = third.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert_ne!(new_etag, etag);
}

#[tokio::test]
async fn rate_limit_kicks_in_above_budget() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let mut saw_rate_limited = false;

    for i in 0..70u16 {
        let resp: Value = client
            .post(format!("{base}/command"))
            .json(&json!({"type": "dmx.patch", "universe": 0, "items": [{"ch": 1, "val": (i % 255) as u8}]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if resp["accepted"] == false && resp["reason"] == "RATE_LIMITED" {
            saw_rate_limited = true;
        }
    }
    assert!(saw_rate_limited, "expected at least one RATE_LIMITED ack in a 70-request burst");
}

#[tokio::test]
async fn oversize_patch_is_rejected() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();
    let items: Vec<Value> = (1..=65u16).map(|ch| json!({"ch": ch, "val": 1})).collect();

    let ack: Value = client
        .post(format!("{base}/command"))
        .json(&json!({"type": "dmx.patch", "universe": 0, "items": items}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ack["accepted"], false);
    assert_eq!(ack["reason"], "PATCH_TOO_LARGE");
}

#[tokio::test]
async fn healthz_and_readyz_are_ok() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    let health: Value = client.get(format!("{base}/healthz")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn readyz_is_503_while_the_configured_bus_is_disconnected() {
    let base = spawn_test_server_with_bus(false).await;
    let client = reqwest::Client::new();

    let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let base = spawn_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/command"))
        .json(&json!({"type": "dmx.patch", "universe": 0, "items": [{"ch": 1, "val": 1}]}))
        .send()
        .await
        .unwrap();

    let body = client.get(format!("{base}/metrics")).send().await.unwrap().text().await.unwrap();
    assert!(body.contains("# TYPE dmx_core_cmds_total counter"));
}
