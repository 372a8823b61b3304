use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Kind taxonomy
// ---------------------------------------------------------------------------

/// Structured failure kinds produced by the backend client. Callers branch
/// on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Backend URL missing or unusable; surfaced immediately.
    Configuration,
    /// Missing/empty/invalid token, 401, or non-confirmation 403.
    Auth,
    /// Socket-level failure.
    Network,
    /// Request deadline exceeded.
    Timeout,
    /// Non-JSON body or wrong schema.
    Parse,
    /// Any other >= 400 status.
    Http,
    /// 429; carries a parsed retry hint when available.
    RateLimit,
    /// 403 with a CONFIRMATION_REQUIRED challenge.
    Confirmation,
    /// Client-side precondition failed (e.g. empty image payload).
    Validation,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Auth => "auth",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Http => "http",
            Self::RateLimit => "rate_limit",
            Self::Confirmation => "confirmation",
            Self::Validation => "validation",
        }
    }
}

// ---------------------------------------------------------------------------
// Confirmation challenge
// ---------------------------------------------------------------------------

/// Payload of a 403 CONFIRMATION_REQUIRED response: the challenge to echo
/// back on approval plus the ordered pending-action summaries to show the
/// operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationChallenge {
    pub challenge_id: String,
    pub pending_actions: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
#[error("backend {}: {message}", kind.as_str())]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<String>,
    /// Present only for `kind == Confirmation`.
    pub confirmation: Option<ConfirmationChallenge>,
    /// Present only for `kind == RateLimit`, when the server said so.
    pub retry_after_seconds: Option<u64>,
}

pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    fn base(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            details: None,
            confirmation: None,
            retry_after_seconds: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Configuration, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Auth, message)
    }

    pub fn network(details: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Network, "Backend request failed").with_details(details)
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Timeout, "Backend request timed out").with_details(details)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Parse, message)
    }

    pub fn http(status_code: u16, details: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Http, "Backend request returned error")
            .with_status(status_code)
            .with_details(details)
    }

    pub fn rate_limit(retry_after_seconds: Option<u64>, details: impl Into<String>) -> Self {
        let message = match retry_after_seconds {
            Some(secs) => {
                let mins = secs.div_ceil(60);
                let unit = if mins == 1 { "minute" } else { "minutes" };
                format!("Rate limit exceeded. Try again in {mins} {unit}.")
            }
            None => "Rate limit exceeded. Try again later.".to_string(),
        };
        let mut err = Self::base(BackendErrorKind::RateLimit, message).with_status(429);
        err.retry_after_seconds = retry_after_seconds;
        err.with_details(details)
    }

    pub fn confirmation(challenge_id: impl Into<String>, pending_actions: Vec<serde_json::Value>) -> Self {
        let mut err = Self::base(
            BackendErrorKind::Confirmation,
            "Backend confirmation required",
        )
        .with_status(403);
        err.confirmation = Some(ConfirmationChallenge {
            challenge_id: challenge_id.into(),
            pending_actions,
        });
        err
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::base(BackendErrorKind::Validation, message)
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        if !details.is_empty() {
            self.details = Some(details);
        }
        self
    }

    pub fn is_kind(&self, kind: BackendErrorKind) -> bool {
        self.kind == kind
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
