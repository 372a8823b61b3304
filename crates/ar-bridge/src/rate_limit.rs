//! Per-source-address rate limiting for every debug endpoint. Overflow
//! answers 429 with a `Retry-After` header.

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use ar_harness::rate_limiter::RateLimiter;

// ---------------------------------------------------------------------------
// SourceRateLimitLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SourceRateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl SourceRateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for SourceRateLimitLayer {
    type Service = SourceRateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SourceRateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceRateLimitMiddleware
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SourceRateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

/// The server binds loopback-only, so proxy headers are the only way two
/// sources can differ; absent headers collapse to one local bucket.
fn source_key(req: &Request<Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

impl<S> Service<Request<Body>> for SourceRateLimitMiddleware<S>
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
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key = source_key(&req);
            match limiter.check(&key) {
                Ok(()) => inner.call(req).await,
                Err(e) => {
                    let retry_secs = e.retry_after().as_secs().max(1);
                    warn!(source = %key, retry_secs, "debug request rate limited");
                    let resp = (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("Retry-After", retry_secs.to_string())],
                        axum::Json(serde_json::json!({
                            "ok": false,
                            "error": "rate limit exceeded",
                            "retry_after_seconds": retry_secs,
                        })),
                    )
                        .into_response();
                    Ok(resp)
                }
            }
        })
    }
}
