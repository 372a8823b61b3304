//! Credential redaction for structured events.
//!
//! Any event that may carry credentials (audit fields, error details,
//! request metadata) passes through [`redact_value`] before it is written
//! anywhere. Redaction is keyed on field names, not values: a key that
//! matches the sensitive pattern set has its value replaced wholesale.

use serde_json::Value;

pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Substring patterns matched against lowercased, `-`-normalized keys.
/// `token` deliberately covers `bearer_token`, `access_token`,
/// `auth_token`, and `backend_token`.
const SENSITIVE_PATTERNS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "password",
    "passwd",
    "secret",
    "authorization",
    "credential",
    "private_key",
];

fn key_is_sensitive(key: &str) -> bool {
    let normalized = key.to_lowercase().replace('-', "_");
    SENSITIVE_PATTERNS.iter().any(|p| normalized.contains(p))
}

fn redacted_placeholder(value: &Value) -> Value {
    match value {
        Value::String(s) if !s.is_empty() => {
            Value::String(format!("[REDACTED:{} chars]", s.chars().count()))
        }
        _ => Value::String("[REDACTED]".to_string()),
    }
}

fn redact_at_depth(value: &Value, depth: usize, max_depth: usize) -> Value {
    if depth > max_depth {
        return Value::String("[max depth reached]".to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                if key_is_sensitive(key) {
                    out.insert(key.clone(), redacted_placeholder(val));
                } else {
                    out.insert(key.clone(), redact_at_depth(val, depth + 1, max_depth));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_at_depth(item, depth + 1, max_depth))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Redact sensitive fields in a JSON value, traversing nested structures
/// up to `max_depth`.
pub fn redact_value(value: &Value, max_depth: usize) -> Value {
    redact_at_depth(value, 0, max_depth)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
