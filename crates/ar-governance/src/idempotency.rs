use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Default window inside which identical commands are considered replays.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(2);

/// Stable 256-bit fingerprint of a command invocation.
///
/// Canonical form is `{"command": name, "payload": payload}` serialized
/// with sorted object keys (serde_json's default map ordering), so two
/// payloads that differ only in key order fingerprint identically.
pub fn fingerprint(command_name: &str, payload: &Value) -> String {
    let canonical = serde_json::json!({
        "command": command_name,
        "payload": payload,
    })
    .to_string();
    let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest.as_ref() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Rejects duplicate command fingerprints inside a short time window.
#[derive(Debug)]
pub struct IdempotencyGuard {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl IdempotencyGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Record `fp` unless it was already seen within the window. Expired
    /// entries are purged before the check so stale fingerprints never
    /// cause false denials.
    pub fn check_and_record(&self, fp: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        seen.retain(|_, observed_at| now.duration_since(*observed_at) <= self.window);
        if seen.contains_key(fp) {
            return false;
        }
        seen.insert(fp.to_string(), now);
        true
    }

    /// Drop all tracked fingerprints.
    pub fn reset(&self) {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
