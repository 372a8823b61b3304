//! Bearer-token authentication for the protected debug endpoints.
//!
//! The token arrives via `Authorization: Bearer <token>` or
//! `X-Debug-Token`. Comparison is constant-time. With no token configured
//! the protected surface is closed, not open: every request is rejected
//! until `DEBUG_SERVER_TOKEN` is set.

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use ar_telemetry::AuditSink;

// ---------------------------------------------------------------------------
// DebugAuthLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DebugAuthLayer {
    token: Option<Arc<String>>,
    audit: AuditSink,
}

impl DebugAuthLayer {
    pub fn new(token: Option<String>, audit: AuditSink) -> Self {
        Self {
            token: token.map(Arc::new),
            audit,
        }
    }
}

impl<S> Layer<S> for DebugAuthLayer {
    type Service = DebugAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DebugAuthMiddleware {
            inner,
            token: self.token.clone(),
            audit: self.audit.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DebugAuthMiddleware
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DebugAuthMiddleware<S> {
    inner: S,
    token: Option<Arc<String>>,
    audit: AuditSink,
}

fn provided_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get("x-debug-token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
}

impl<S> Service<Request<Body>> for DebugAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let token = self.token.clone();
        let audit = self.audit.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(expected) = token else {
                let resp = (
                    StatusCode::UNAUTHORIZED,
                    axum::Json(serde_json::json!({
                        "ok": false,
                        "error": "DEBUG_SERVER_TOKEN not configured",
                    })),
                )
                    .into_response();
                return Ok(resp);
            };

            match provided_token(&req) {
                Some(ref provided)
                    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) =>
                {
                    inner.call(req).await
                }
                _ => {
                    audit.record(
                        "auth_failure",
                        serde_json::json!({
                            "source": "debug_server",
                            "path": req.uri().path(),
                            "method": req.method().as_str(),
                        }),
                    );
                    let resp = (
                        StatusCode::UNAUTHORIZED,
                        axum::Json(serde_json::json!({"ok": false, "error": "unauthorized"})),
                    )
                        .into_response();
                    Ok(resp)
                }
            }
        })
    }
}
