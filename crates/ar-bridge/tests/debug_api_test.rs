use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use ar_bridge::{debug_router, DebugHost, DebugServerConfig};
use ar_telemetry::{AuditSink, MetricsCollector};

// ---------------------------------------------------------------------------
// Mock host
// ---------------------------------------------------------------------------

struct MockHost {
    ready: AtomicBool,
    metrics: Arc<MetricsCollector>,
}

impl MockHost {
    fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

#[async_trait]
impl DebugHost for MockHost {
    async fn status(&self) -> Value {
        json!({"instance_id": "inst-1", "backend_configured": false, "uptime_seconds": 1})
    }

    async fn readiness(&self) -> (bool, Value) {
        let ready = self.ready.load(Ordering::SeqCst);
        (ready, json!({"config": true, "memory": ready}))
    }

    async fn debug_ask(&self, message: String) -> Result<Value, String> {
        if message == "fail" {
            Err("turn failed".to_string())
        } else {
            Ok(json!({"response_text": format!("echo:{message}"), "source": "local"}))
        }
    }

    async fn debug_run(&self, command: String) -> Result<Value, String> {
        Ok(json!({"stdout": format!("ran:{command}"), "return_code": 0}))
    }

    async fn debug_see(&self, use_camera: bool) -> Result<Value, String> {
        Ok(json!({"mode": if use_camera { "camera" } else { "screen" }}))
    }

    fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }
}

fn config(token: Option<&str>, rate: u64) -> DebugServerConfig {
    DebugServerConfig {
        port: 0,
        token: token.map(String::from),
        rate_limit_per_minute: rate,
        metrics_enabled: true,
    }
}

fn router(token: Option<&str>, rate: u64, ready: bool) -> axum::Router {
    debug_router(
        Arc::new(MockHost::new(ready)),
        &config(token, rate),
        AuditSink::memory(),
    )
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_open() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(get("/debug/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["ok"], json!(true));
}

#[tokio::test]
async fn ready_reflects_checks() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(get("/debug/ready"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router(Some("s3cret"), 60, false)
        .oneshot(get("/debug/ready"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(resp).await;
    assert_eq!(body["checks"]["memory"], json!(false));
}

#[tokio::test]
async fn metrics_is_open_prometheus_text() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(get("/debug/metrics"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("arcanos_uptime_seconds"));
}

#[tokio::test]
async fn status_requires_token() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(get("/debug/status"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_accepts_either_header() {
    let app = router(Some("s3cret"), 60, true);
    let req = Request::builder()
        .uri("/debug/status")
        .header("X-Debug-Token", "s3cret")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["instance_id"], json!("inst-1"));

    let app = router(Some("s3cret"), 60, true);
    let req = Request::builder()
        .uri("/debug/status")
        .header("Authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_token_is_rejected_and_audited() {
    let audit = AuditSink::memory();
    let app = debug_router(
        Arc::new(MockHost::new(true)),
        &config(Some("s3cret"), 60),
        audit.clone(),
    );
    let resp = app
        .oneshot(post_json("/debug/ask", Some("wrong"), json!({"message": "hi"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(audit.captured_names(), vec!["auth_failure"]);
}

#[tokio::test]
async fn unconfigured_token_closes_protected_surface() {
    let resp = router(None, 60, true)
        .oneshot(post_json("/debug/ask", Some("anything"), json!({"message": "hi"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("not configured"));
}

#[tokio::test]
async fn ask_round_trips_through_host() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(post_json("/debug/ask", Some("s3cret"), json!({"message": "hi"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["result"]["response_text"], json!("echo:hi"));
}

#[tokio::test]
async fn host_errors_surface_as_500() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(post_json("/debug/ask", Some("s3cret"), json!({"message": "fail"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await["error"], json!("turn failed"));
}

#[tokio::test]
async fn run_and_see_round_trip() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(post_json("/debug/run", Some("s3cret"), json!({"command": "Get-Date"})))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["result"]["stdout"], json!("ran:Get-Date"));

    let resp = router(Some("s3cret"), 60, true)
        .oneshot(post_json("/debug/see", Some("s3cret"), json!({"use_camera": true})))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["result"]["mode"], json!("camera"));
}

#[tokio::test]
async fn overflow_gets_429_with_retry_after() {
    let app = router(Some("s3cret"), 2, true);
    for _ in 0..2 {
        let resp = app.clone().oneshot(get("/debug/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app.oneshot(get("/debug/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().get("Retry-After").is_some());
}

#[tokio::test]
async fn unknown_paths_are_404() {
    let resp = router(Some("s3cret"), 60, true)
        .oneshot(get("/debug/unknown"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
