use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use hdhrelay::{
    ControlPort, RelayController, RelaySettings, RelayState, Result, SinkConnector,
    SourceConnector, Station, StationRegistry, StreamInfo, StreamSink, StreamSource,
};
use hdhserver::relay_api::{create_router, RelayApiState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

/// Endless tuner stream of small chunks
struct LoopSource;

struct LoopStream;

#[async_trait]
impl SourceConnector for LoopSource {
    async fn open(&self, _station: &Station) -> Result<Box<dyn StreamSource>> {
        Ok(Box::new(LoopStream))
    }
}

#[async_trait]
impl StreamSource for LoopStream {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        sleep(Duration::from_millis(10)).await;
        Ok(Some(Bytes::from_static(b"adts")))
    }

    fn content_type(&self) -> Option<&str> {
        Some("audio/aac")
    }

    async fn close(&mut self) {}
}

/// Icecast mount that accepts everything
struct NullSink;

struct NullStream;

#[async_trait]
impl SinkConnector for NullSink {
    async fn open(&self, _info: &StreamInfo) -> Result<Box<dyn StreamSink>> {
        Ok(Box::new(NullStream))
    }
}

#[async_trait]
impl StreamSink for NullStream {
    async fn write(&mut self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

fn spawn_relay() -> (RelayController, ControlPort) {
    let registry = StationRegistry::with_stations([
        Station::new("704", "BBC Radio 4", "http://tuner.test/auto/v704"),
        Station::new("700", "BBC Radio 1", "http://tuner.test/auto/v700"),
    ]);
    RelayController::spawn(
        registry,
        Arc::new(LoopSource),
        Arc::new(NullSink),
        RelaySettings::default(),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_stations_are_listed_by_name() {
    let (controller, port) = spawn_relay();
    let app = create_router(RelayApiState::new(port.clone()));

    let (status, body) = send(&app, get("/stations")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["700", "704"]);

    port.shutdown().unwrap();
    controller.wait().await.unwrap();
}

#[tokio::test]
async fn test_select_then_stop() {
    let (controller, port) = spawn_relay();
    let app = create_router(RelayApiState::new(port.clone()));

    let (status, body) = send(&app, post_json("/select", json!({"station": "BBC Radio 4"}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["station"]["id"], "704");

    timeout(WAIT, port.wait_for(|s| s.relay_state == RelayState::Streaming))
        .await
        .unwrap()
        .unwrap();

    let (status, body) = send(&app, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_station_id"], "704");
    assert_eq!(body["relay_state"], "STREAMING");
    assert!(body["last_error"].is_null());

    let (status, _) = send(&app, Request::post("/stop").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let idle = timeout(WAIT, port.wait_for(|s| s.is_idle()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(idle.relay_state, RelayState::Stopped);

    port.shutdown().unwrap();
    controller.wait().await.unwrap();
}

#[tokio::test]
async fn test_unknown_station_is_not_found() {
    let (controller, port) = spawn_relay();
    let app = create_router(RelayApiState::new(port.clone()));
    let mut events = port.subscribe();

    let (status, body) = send(&app, post_json("/select", json!({"station": "999"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "unknown_station");

    // refused without touching the relay
    assert!(port.snapshot().is_idle());
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event, hdhrelay::ControlEvent::Rejected { .. }));

    port.shutdown().unwrap();
    controller.wait().await.unwrap();
}

#[tokio::test]
async fn test_requests_after_shutdown_are_unavailable() {
    let (controller, port) = spawn_relay();
    let app = create_router(RelayApiState::new(port.clone()));

    port.shutdown().unwrap();
    controller.wait().await.unwrap();

    let (status, body) = send(&app, post_json("/select", json!({"station": "700"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "closed");

    let (status, _) = send(&app, Request::post("/stop").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_listener_count() {
    let (controller, port) = spawn_relay();

    let app = create_router(RelayApiState::new(port.clone()));
    let (_, body) = send(&app, get("/listeners")).await;
    assert_eq!(body, json!({"listeners": null, "monitored": false}));

    let (tx, rx) = watch::channel(None);
    let app = create_router(RelayApiState::new(port.clone()).with_listeners(rx));
    tx.send_replace(Some(3));
    let (_, body) = send(&app, get("/listeners")).await;
    assert_eq!(body, json!({"listeners": 3, "monitored": true}));

    port.shutdown().unwrap();
    controller.wait().await.unwrap();
}

#[tokio::test]
async fn test_event_feed_starts_with_status() {
    let (controller, port) = spawn_relay();
    let app = create_router(RelayApiState::new(port.clone()));

    let response = app.oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    let mut body = response.into_body();
    let frame = timeout(WAIT, body.frame()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: status\n"), "{text}");
    assert!(text.contains(r#""relay_state":"STOPPED""#), "{text}");

    port.select("700").unwrap();
    let frame = timeout(WAIT, body.frame()).await.unwrap().unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains(r#""current_station_id":"700""#), "{text}");
    assert!(text.contains(r#""relay_state":"CONNECTING""#), "{text}");

    port.shutdown().unwrap();
    controller.wait().await.unwrap();
}
