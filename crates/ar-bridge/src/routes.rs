use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use ar_harness::rate_limiter::{RateLimitConfig, RateLimiter};
use ar_harness::ShutdownSignal;
use ar_telemetry::AuditSink;

use crate::auth::DebugAuthLayer;
use crate::host::DebugHost;
use crate::rate_limit::SourceRateLimitLayer;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DebugServerConfig {
    /// Loopback port; 0 lets the OS choose (tests).
    pub port: u16,
    pub token: Option<String>,
    pub rate_limit_per_minute: u64,
    pub metrics_enabled: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type HostState = Arc<dyn DebugHost>;

async fn health() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

async fn ready(State(host): State<HostState>) -> impl IntoResponse {
    let (ready, checks) = host.readiness().await;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({"ok": ready, "checks": checks})))
}

async fn metrics(State(host): State<HostState>) -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        host.metrics().render(),
    )
}

async fn status(State(host): State<HostState>) -> Json<serde_json::Value> {
    Json(host.status().await)
}

#[derive(Deserialize)]
struct AskBody {
    message: String,
}

async fn ask(State(host): State<HostState>, Json(body): Json<AskBody>) -> impl IntoResponse {
    respond(host.debug_ask(body.message).await)
}

#[derive(Deserialize)]
struct RunBody {
    command: String,
}

async fn run(State(host): State<HostState>, Json(body): Json<RunBody>) -> impl IntoResponse {
    respond(host.debug_run(body.command).await)
}

#[derive(Deserialize, Default)]
struct SeeBody {
    #[serde(default)]
    use_camera: bool,
}

/// The body is optional; an absent or malformed body means screen capture.
async fn see(State(host): State<HostState>, bytes: axum::body::Bytes) -> impl IntoResponse {
    let body: SeeBody = if bytes.is_empty() {
        SeeBody::default()
    } else {
        serde_json::from_slice(&bytes).unwrap_or_default()
    };
    respond(host.debug_see(body.use_camera).await)
}

fn respond(result: Result<serde_json::Value, String>) -> axum::response::Response {
    match result {
        Ok(value) => Json(json!({"ok": true, "result": value})).into_response(),
        Err(message) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"ok": false, "error": message})),
        )
            .into_response(),
    }
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": "not found"})),
    )
}

// ---------------------------------------------------------------------------
// Router / server
// ---------------------------------------------------------------------------

/// Build the debug router: open liveness/readiness/metrics, token-gated
/// operational endpoints, per-source rate limiting over everything.
pub fn debug_router(host: HostState, config: &DebugServerConfig, audit: AuditSink) -> Router {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_minute(
        config.rate_limit_per_minute.max(1),
    )));

    let protected = Router::new()
        .route("/debug/status", get(status))
        .route("/debug/ask", post(ask))
        .route("/debug/run", post(run))
        .route("/debug/see", post(see))
        .layer(DebugAuthLayer::new(config.token.clone(), audit));

    let mut open = Router::new()
        .route("/debug/health", get(health))
        .route("/debug/ready", get(ready));
    if config.metrics_enabled {
        open = open.route("/debug/metrics", get(metrics));
    }

    open.merge(protected)
        .fallback(not_found)
        .layer(SourceRateLimitLayer::new(limiter))
        .with_state(host)
}

/// Bind loopback-only and serve until shutdown; returns the bound port.
pub async fn serve(
    host: HostState,
    config: DebugServerConfig,
    audit: AuditSink,
    shutdown: ShutdownSignal,
) -> std::io::Result<u16> {
    let app = debug_router(host, &config, audit);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    let port = listener.local_addr()?.port();
    let mut rx = shutdown.subscribe();

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = rx.recv().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "debug server error");
        }
    });

    info!(port, "debug server listening on loopback");
    Ok(port)
}
