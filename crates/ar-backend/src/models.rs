use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BackendError, BackendResult};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// One turn of an OpenAI-style message list sent to `/api/ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub response_text: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionResult {
    pub response_text: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    pub model: String,
}

/// Outcome of `/api/daemon/confirm-actions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub queued: u64,
}

// ---------------------------------------------------------------------------
// Typed parsing
// ---------------------------------------------------------------------------

/// Token usage lives either at the top level (`tokens`) or nested under
/// `meta.tokens.total_tokens`, depending on backend version.
fn extract_tokens(body: &Value) -> u64 {
    if let Some(tokens) = body.get("tokens").and_then(Value::as_u64) {
        return tokens;
    }
    body.get("meta")
        .and_then(|m| m.get("tokens"))
        .and_then(|t| t.get("total_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn extract_cost(body: &Value) -> f64 {
    body.get("cost").and_then(Value::as_f64).unwrap_or(0.0)
}

pub(crate) fn parse_chat(body: &Value) -> BackendResult<ChatResult> {
    // Production backends answer with `result`, older ones with `response`.
    let text = body
        .get("result")
        .and_then(Value::as_str)
        .or_else(|| body.get("response").and_then(Value::as_str));
    let Some(text) = text else {
        return Err(BackendError::parse("Chat response missing text"));
    };
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .or_else(|| body.get("activeModel").and_then(Value::as_str))
        .unwrap_or("unknown");
    Ok(ChatResult {
        response_text: text.to_string(),
        tokens_used: extract_tokens(body),
        cost_usd: extract_cost(body),
        model: model.to_string(),
    })
}

pub(crate) fn parse_vision(body: &Value) -> BackendResult<VisionResult> {
    let Some(text) = body.get("response").and_then(Value::as_str) else {
        return Err(BackendError::parse("Vision response missing text"));
    };
    Ok(VisionResult {
        response_text: text.to_string(),
        tokens_used: body.get("tokens").and_then(Value::as_u64).unwrap_or(0),
        cost_usd: extract_cost(body),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}

pub(crate) fn parse_transcription(body: &Value) -> BackendResult<TranscriptionResult> {
    let Some(text) = body.get("text").and_then(Value::as_str) else {
        return Err(BackendError::parse("Transcription response missing text"));
    };
    Ok(TranscriptionResult {
        text: text.to_string(),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
