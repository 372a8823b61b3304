//! Append-only audit trail for governance decisions and privileged
//! operations.
//!
//! Every event is an envelope `{ts, event, ...fields}` serialized as one
//! JSON line. Field values pass through the credential redactor before
//! they touch any sink; the runtime never reads events back.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use ar_harness::redact::{redact_value, DEFAULT_MAX_DEPTH};

#[derive(Debug)]
enum Sink {
    /// JSON lines appended to `audit.log` under the log dir.
    File {
        path: PathBuf,
        file: Mutex<std::fs::File>,
    },
    /// Tracing-only fallback when no log dir is writable.
    Log,
    /// In-memory capture for tests.
    Memory(Mutex<Vec<Value>>),
}

/// Cheaply clonable handle to the audit trail.
#[derive(Debug, Clone)]
pub struct AuditSink {
    inner: Arc<Sink>,
}

impl AuditSink {
    /// Open (or create) the file-backed sink at `log_dir/audit.log`.
    pub fn file(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join("audit.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            inner: Arc::new(Sink::File {
                path,
                file: Mutex::new(file),
            }),
        })
    }

    /// Tracing-only sink; used when the log dir is unavailable.
    pub fn log_only() -> Self {
        Self {
            inner: Arc::new(Sink::Log),
        }
    }

    /// In-memory sink for tests.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(Sink::Memory(Mutex::new(Vec::new()))),
        }
    }

    /// Append one audit event. `fields` must be a JSON object; its values
    /// are redacted before writing.
    pub fn record(&self, event: &str, fields: Value) {
        let redacted = redact_value(&fields, DEFAULT_MAX_DEPTH);
        let mut envelope = serde_json::Map::new();
        envelope.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        envelope.insert("event".to_string(), Value::String(event.to_string()));
        if let Value::Object(map) = redacted {
            for (key, value) in map {
                envelope.entry(key).or_insert(value);
            }
        }
        let envelope = Value::Object(envelope);

        debug!(target: "audit", event, "audit event");
        match self.inner.as_ref() {
            Sink::File { path, file } => {
                let line = envelope.to_string();
                let mut guard = file.lock().unwrap_or_else(|p| p.into_inner());
                if let Err(e) = writeln!(guard, "{line}") {
                    warn!(path = %path.display(), error = %e, "audit write failed");
                }
            }
            Sink::Log => {
                tracing::info!(target: "audit", entry = %envelope, "audit");
            }
            Sink::Memory(events) => {
                events
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(envelope);
            }
        }
    }

    /// Captured events; empty for non-memory sinks. Test support only -
    /// the runtime treats the sink as write-only.
    pub fn captured(&self) -> Vec<Value> {
        match self.inner.as_ref() {
            Sink::Memory(events) => events.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            _ => Vec::new(),
        }
    }

    /// Names of captured events, in order. Test support only.
    pub fn captured_names(&self) -> Vec<String> {
        self.captured()
            .iter()
            .filter_map(|e| e.get("event").and_then(Value::as_str).map(String::from))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
