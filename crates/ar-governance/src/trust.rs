use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use ar_backend::BackendClient;
use ar_telemetry::AuditSink;

// ---------------------------------------------------------------------------
// TrustState
// ---------------------------------------------------------------------------

/// Three-valued trust posture driving the governance gate.
///
/// `Full` requires a configured backend and a registry cache within TTL;
/// anything else is `Degraded`. `Unsafe` is entered explicitly when a
/// confirmation invariant is violated and does not persist across
/// recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustState {
    Full,
    Degraded,
    Unsafe,
}

impl TrustState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Degraded => "DEGRADED",
            Self::Unsafe => "UNSAFE",
        }
    }
}

// ---------------------------------------------------------------------------
// TrustRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TrustInner {
    registry: Option<Value>,
    updated_at: Option<Instant>,
    trust: TrustState,
    warned_unavailable: bool,
}

/// Registry cache plus derived trust state behind one mutex.
///
/// The registry payload is opaque here; it is replaced atomically and
/// never mutated in place. The lock is never held across an HTTP call.
pub struct TrustRegistry {
    inner: Mutex<TrustInner>,
    ttl: Duration,
    audit: AuditSink,
}

impl TrustRegistry {
    /// `ttl_minutes` has a floor of one minute.
    pub fn new(ttl_minutes: u64, audit: AuditSink) -> Self {
        Self {
            inner: Mutex::new(TrustInner {
                registry: None,
                updated_at: None,
                trust: TrustState::Degraded,
                warned_unavailable: false,
            }),
            ttl: Duration::from_secs(ttl_minutes.max(1) * 60),
            audit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrustInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Fetch the registry from the backend. On success the cache is
    /// replaced and stamped; on failure the existing cache is left
    /// untouched and a one-time warning is logged.
    pub async fn refresh_registry(&self, client: &BackendClient) -> bool {
        match client.registry().await {
            Ok(payload) => {
                self.apply_registry(payload);
                true
            }
            Err(e) => {
                let mut inner = self.lock();
                if inner.registry.is_none() && !inner.warned_unavailable {
                    warn!(error = %e, "backend registry unavailable; using built-in backend prompt");
                    inner.warned_unavailable = true;
                }
                false
            }
        }
    }

    /// Store a registry payload and stamp its freshness.
    pub fn apply_registry(&self, payload: Value) {
        let mut inner = self.lock();
        inner.registry = Some(payload);
        inner.updated_at = Some(Instant::now());
    }

    /// Cache present and within TTL.
    pub fn is_valid(&self) -> bool {
        let inner = self.lock();
        match (&inner.registry, inner.updated_at) {
            (Some(_), Some(updated_at)) => updated_at.elapsed() <= self.ttl,
            _ => false,
        }
    }

    /// Copy of the cached registry payload, if any.
    pub fn registry_snapshot(&self) -> Option<Value> {
        self.lock().registry.clone()
    }

    pub fn current(&self) -> TrustState {
        self.lock().trust
    }

    /// Explicit transition (e.g. to `Unsafe` after a denial); audited when
    /// the state actually changes.
    pub fn set_trust(&self, new_state: TrustState) {
        let old_state = {
            let mut inner = self.lock();
            let old = inner.trust;
            inner.trust = new_state;
            old
        };
        if old_state != new_state {
            self.audit.record(
                "trust_state_change",
                json!({ "old": old_state.as_str(), "new": new_state.as_str() }),
            );
        }
    }

    /// Derive trust from backend reachability and registry freshness.
    pub fn recompute(&self, backend_configured: bool) -> TrustState {
        let next = if backend_configured && self.is_valid() {
            TrustState::Full
        } else {
            TrustState::Degraded
        };
        self.set_trust(next);
        next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_ttl(ttl_minutes: u64) -> (TrustRegistry, AuditSink) {
        let audit = AuditSink::memory();
        (TrustRegistry::new(ttl_minutes, audit.clone()), audit)
    }

    #[test]
    fn empty_cache_is_invalid_and_degraded() {
        let (trust, _audit) = registry_with_ttl(10);
        assert!(!trust.is_valid());
        assert_eq!(trust.recompute(true), TrustState::Degraded);
    }

    #[test]
    fn fresh_cache_with_backend_is_full() {
        let (trust, audit) = registry_with_ttl(10);
        trust.apply_registry(json!({"modules": []}));
        assert!(trust.is_valid());
        assert_eq!(trust.recompute(true), TrustState::Full);
        assert_eq!(audit.captured_names(), vec!["trust_state_change"]);
    }

    #[test]
    fn fresh_cache_without_backend_stays_degraded() {
        let (trust, _audit) = registry_with_ttl(10);
        trust.apply_registry(json!({}));
        assert_eq!(trust.recompute(false), TrustState::Degraded);
    }

    #[test]
    fn transitions_are_audited_once() {
        let (trust, audit) = registry_with_ttl(10);
        trust.set_trust(TrustState::Unsafe);
        trust.set_trust(TrustState::Unsafe);
        assert_eq!(audit.captured().len(), 1);
        let event = &audit.captured()[0];
        assert_eq!(event["old"], json!("DEGRADED"));
        assert_eq!(event["new"], json!("UNSAFE"));
    }

    #[test]
    fn unsafe_does_not_survive_recompute() {
        let (trust, _audit) = registry_with_ttl(10);
        trust.apply_registry(json!({}));
        trust.set_trust(TrustState::Unsafe);
        assert_eq!(trust.recompute(true), TrustState::Full);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let (trust, _audit) = registry_with_ttl(10);
        trust.apply_registry(json!({"modules": ["a"]}));
        let snap = trust.registry_snapshot().unwrap();
        assert_eq!(snap["modules"][0], json!("a"));
        // Replacing the cache does not affect prior snapshots.
        trust.apply_registry(json!({"modules": ["b"]}));
        assert_eq!(snap["modules"][0], json!("a"));
    }
}
