use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use ar_telemetry::AuditSink;

use crate::error::{BackendError, BackendResult};

/// Re-reads the bearer token on every request so credentials refreshed
/// mid-run take effect without a restart.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

// ---------------------------------------------------------------------------
// URL normalization
// ---------------------------------------------------------------------------

fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let end = rest.find(['/', ':', '?']).unwrap_or(rest.len());
    &rest[..end]
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

/// Normalize a configured backend URL.
///
/// Empty input is the allowed "unconfigured" state. A trailing slash is
/// stripped. `https://` is required for any non-loopback host unless
/// `allow_http` is set.
pub fn normalize_backend_url(raw: &str, allow_http: bool) -> BackendResult<Option<String>> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.starts_with("https://") {
        return Ok(Some(trimmed.to_string()));
    }
    if trimmed.starts_with("http://") {
        if allow_http || is_loopback_host(host_of(trimmed)) {
            return Ok(Some(trimmed.to_string()));
        }
        return Err(BackendError::configuration(format!(
            "Backend URL `{trimmed}` must use https (set BACKEND_ALLOW_HTTP for development)"
        )));
    }
    Err(BackendError::configuration(format!(
        "Backend URL `{trimmed}` must start with http:// or https://"
    )))
}

// ---------------------------------------------------------------------------
// Raw response
// ---------------------------------------------------------------------------

/// Status, retry hint, and body of a raw backend exchange. Used by the
/// scheduler loops, which branch on status codes themselves.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after_seconds: Option<u64>,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

// ---------------------------------------------------------------------------
// BackendClient
// ---------------------------------------------------------------------------

/// Stateless JSON client for the control-plane backend.
pub struct BackendClient {
    base_url: Option<String>,
    token_provider: TokenProvider,
    http: reqwest::Client,
    audit: AuditSink,
}

impl BackendClient {
    pub fn new(
        base_url: Option<&str>,
        allow_http: bool,
        token_provider: TokenProvider,
        timeout_secs: u64,
        audit: AuditSink,
    ) -> BackendResult<Self> {
        let base_url = match base_url {
            Some(raw) => normalize_backend_url(raw, allow_http)?,
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| BackendError::configuration(format!("http client: {e}")))?;
        Ok(Self {
            base_url,
            token_provider,
            http,
            audit,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn resolve_token(&self, method: &str, path: &str) -> BackendResult<String> {
        match (self.token_provider)() {
            Some(token) if !token.trim().is_empty() => Ok(token),
            _ => {
                self.audit.record(
                    "auth_failure",
                    json!({
                        "source": "backend_client",
                        "reason": "token_missing",
                        "path": path,
                        "method": method,
                    }),
                );
                Err(BackendError::auth("Backend token is missing"))
            }
        }
    }

    /// Perform a raw request and surface status, `Retry-After`, and body
    /// without interpreting the status code.
    pub async fn make_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> BackendResult<RawResponse> {
        let Some(base) = self.base_url.as_deref() else {
            return Err(BackendError::configuration("Backend URL is not configured"));
        };
        let token = self.resolve_token(method, path)?;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| BackendError::validation(format!("invalid HTTP method `{method}`")))?;
        let url = format!("{base}{path}");
        debug!(%url, method = %method, "backend request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(token)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::timeout(e.to_string())
            } else {
                BackendError::network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let header_retry = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();

        Ok(RawResponse {
            status,
            retry_after_seconds: header_retry,
            body,
        })
    }

    /// Request + status mapping: 2xx JSON objects come back as values,
    /// everything else becomes a taxonomy error.
    pub async fn request_json(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> BackendResult<Value> {
        let raw = self.make_request(method, path, body).await?;
        self.map_status(method, path, raw)
    }

    fn map_status(&self, method: &str, path: &str, raw: RawResponse) -> BackendResult<Value> {
        match raw.status {
            401 => {
                self.audit.record(
                    "auth_failure",
                    json!({
                        "source": "backend_client",
                        "reason": "401_unauthorized",
                        "path": path,
                        "method": method,
                        "status_code": 401,
                    }),
                );
                Err(BackendError::auth("Backend authorization failed")
                    .with_status(401)
                    .with_details(raw.body))
            }
            403 => {
                if let Some(challenge) = parse_confirmation_challenge(raw.json().as_ref()) {
                    return Err(challenge);
                }
                self.audit.record(
                    "auth_failure",
                    json!({
                        "source": "backend_client",
                        "reason": "403_forbidden_not_confirmation",
                        "path": path,
                        "method": method,
                        "status_code": 403,
                    }),
                );
                Err(BackendError::auth("Backend authorization failed")
                    .with_status(403)
                    .with_details(raw.body))
            }
            429 => {
                let body_retry = raw
                    .json()
                    .as_ref()
                    .and_then(|v| v.get("retryAfter").and_then(Value::as_u64));
                let retry_after = body_retry.or(raw.retry_after_seconds);
                Err(BackendError::rate_limit(retry_after, raw.body))
            }
            status if status >= 400 => Err(BackendError::http(status, raw.body)),
            status => {
                let parsed: Value = serde_json::from_str(&raw.body).map_err(|e| {
                    BackendError::parse("Backend response is not valid JSON")
                        .with_status(status)
                        .with_details(e.to_string())
                })?;
                if !parsed.is_object() {
                    return Err(BackendError::parse("Backend response is not a JSON object")
                        .with_status(status));
                }
                Ok(parsed)
            }
        }
    }
}

/// Recognize a 403 body of the shape
/// `{code: "CONFIRMATION_REQUIRED", confirmationChallenge: {id}, pending_actions: [...]}`.
fn parse_confirmation_challenge(body: Option<&Value>) -> Option<BackendError> {
    let body = body?;
    if body.get("code").and_then(Value::as_str) != Some("CONFIRMATION_REQUIRED") {
        return None;
    }
    let challenge_id = body
        .get("confirmationChallenge")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)?;
    let pending = body.get("pending_actions").and_then(Value::as_array)?;
    Some(BackendError::confirmation(challenge_id, pending.clone()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;

    #[test]
    fn empty_url_is_unconfigured() {
        assert_eq!(normalize_backend_url("", false).unwrap(), None);
        assert_eq!(normalize_backend_url("   ", false).unwrap(), None);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(
            normalize_backend_url("https://api.example.com/", false).unwrap(),
            Some("https://api.example.com".to_string())
        );
    }

    #[test]
    fn plain_http_requires_loopback_or_override() {
        assert!(normalize_backend_url("http://api.example.com", false).is_err());
        assert_eq!(
            normalize_backend_url("http://127.0.0.1:4000", false).unwrap(),
            Some("http://127.0.0.1:4000".to_string())
        );
        assert_eq!(
            normalize_backend_url("http://localhost:4000/", false).unwrap(),
            Some("http://localhost:4000".to_string())
        );
        assert!(normalize_backend_url("http://api.example.com", true).is_ok());
    }

    #[test]
    fn missing_scheme_is_configuration_error() {
        let err = normalize_backend_url("api.example.com", false).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Configuration);
    }

    #[test]
    fn confirmation_challenge_requires_full_shape() {
        let full = serde_json::json!({
            "code": "CONFIRMATION_REQUIRED",
            "confirmationChallenge": {"id": "ch-9"},
            "pending_actions": [{"summary": "run Get-Date"}],
        });
        let err = parse_confirmation_challenge(Some(&full)).unwrap();
        assert_eq!(err.kind, BackendErrorKind::Confirmation);
        assert_eq!(err.confirmation.unwrap().challenge_id, "ch-9");

        let missing_actions = serde_json::json!({
            "code": "CONFIRMATION_REQUIRED",
            "confirmationChallenge": {"id": "ch-9"},
        });
        assert!(parse_confirmation_challenge(Some(&missing_actions)).is_none());

        let wrong_code = serde_json::json!({"code": "FORBIDDEN"});
        assert!(parse_confirmation_challenge(Some(&wrong_code)).is_none());
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://api.example.com/path"), "api.example.com");
        assert_eq!(host_of("http://localhost:9999/x"), "localhost");
        assert_eq!(host_of("http://127.0.0.1"), "127.0.0.1");
    }
}
