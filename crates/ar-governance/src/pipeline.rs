//! The governed execution pipeline wrapped around privileged,
//! side-effecting calls (`run` and confirmation-required backend actions):
//! audit attempt, deduplicate, recompute trust, gate, invoke, audit the
//! outcome.

use std::fmt::Display;
use std::future::Future;

use serde_json::{json, Value};

use ar_telemetry::AuditSink;

use crate::gate::{assert_allowed, GovernanceError};
use crate::idempotency::{fingerprint, IdempotencyGuard};
use crate::trust::{TrustRegistry, TrustState};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError<E> {
    /// Identical command seen within the dedup window.
    #[error("duplicate command `{command}` suppressed")]
    Duplicate { command: String },
    /// The governance gate refused the action.
    #[error(transparent)]
    Denied(#[from] GovernanceError),
    /// The wrapped action itself failed.
    #[error("{0}")]
    Action(E),
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Run `action` through the idempotency guard and governance gate.
///
/// The gate sees trust as freshly recomputed from backend reachability;
/// a denial transitions trust to `Unsafe` for this decision and is
/// audited. The callable is only invoked when every check passes.
pub async fn execute<T, E, F, Fut>(
    command_name: &str,
    payload: &Value,
    requires_confirmation: bool,
    backend_configured: bool,
    trust: &TrustRegistry,
    guard: &IdempotencyGuard,
    audit: &AuditSink,
    action: F,
) -> Result<T, ExecutionError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    audit.record(
        "execute_attempt",
        json!({
            "command": command_name,
            "trust": trust.current().as_str(),
            "payload": payload,
        }),
    );

    let fp = fingerprint(command_name, payload);
    audit.record(
        "retry_check",
        json!({ "command": command_name, "fingerprint": fp }),
    );
    if !guard.check_and_record(&fp) {
        audit.record(
            "retry_duplicate_rejected",
            json!({ "command": command_name, "fingerprint": fp }),
        );
        return Err(ExecutionError::Duplicate {
            command: command_name.to_string(),
        });
    }

    let current = trust.recompute(backend_configured);

    if let Err(denial) = assert_allowed(command_name, current, requires_confirmation) {
        audit.record(
            "governance_denial",
            json!({
                "command": command_name,
                "reason": denial.to_string(),
                "trust": current.as_str(),
            }),
        );
        trust.set_trust(TrustState::Unsafe);
        return Err(ExecutionError::Denied(denial));
    }

    match action().await {
        Ok(result) => {
            audit.record(
                "execute_success",
                json!({ "command": command_name, "trust": trust.current().as_str() }),
            );
            Ok(result)
        }
        Err(e) => {
            audit.record(
                "execute_failure",
                json!({ "command": command_name, "error": e.to_string() }),
            );
            Err(ExecutionError::Action(e))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fixtures() -> (TrustRegistry, IdempotencyGuard, AuditSink) {
        let audit = AuditSink::memory();
        (
            TrustRegistry::new(10, audit.clone()),
            IdempotencyGuard::new(Duration::from_secs(2)),
            audit,
        )
    }

    #[tokio::test]
    async fn unprivileged_action_runs_in_degraded_trust() {
        let (trust, guard, audit) = fixtures();
        let result: Result<&str, ExecutionError<std::io::Error>> = execute(
            "see",
            &json!({}),
            false,
            false,
            &trust,
            &guard,
            &audit,
            || async { Ok("captured") },
        )
        .await;
        assert_eq!(result.unwrap(), "captured");
        let names = audit.captured_names();
        assert!(names.contains(&"execute_attempt".to_string()));
        assert!(names.contains(&"execute_success".to_string()));
    }

    #[tokio::test]
    async fn privileged_action_denied_without_full_trust() {
        let (trust, guard, audit) = fixtures();
        let calls = AtomicUsize::new(0);

        let result: Result<(), ExecutionError<std::io::Error>> = execute(
            "run",
            &json!({"command": "Get-Date"}),
            true,
            true, // backend configured but registry cache empty -> Degraded
            &trust,
            &guard,
            &audit,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;

        assert!(matches!(result, Err(ExecutionError::Denied(_))));
        // Invariant: the callable is never invoked on a denial.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(audit
            .captured_names()
            .contains(&"governance_denial".to_string()));
        assert_eq!(trust.current(), TrustState::Unsafe);
    }

    #[tokio::test]
    async fn privileged_action_allowed_with_full_trust() {
        let (trust, guard, audit) = fixtures();
        trust.apply_registry(json!({"modules": []}));

        let result: Result<&str, ExecutionError<std::io::Error>> = execute(
            "run",
            &json!({"command": "Get-Date"}),
            true,
            true,
            &trust,
            &guard,
            &audit,
            || async { Ok("ran") },
        )
        .await;
        assert_eq!(result.unwrap(), "ran");
        assert_eq!(trust.current(), TrustState::Full);
    }

    #[tokio::test]
    async fn duplicate_within_window_is_rejected_before_the_gate() {
        let (trust, guard, audit) = fixtures();
        trust.apply_registry(json!({}));
        let calls = AtomicUsize::new(0);
        let payload = json!({"command": "Get-Date"});

        for _ in 0..2 {
            let _: Result<(), ExecutionError<std::io::Error>> = execute(
                "run",
                &payload,
                true,
                true,
                &trust,
                &guard,
                &audit,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                },
            )
            .await;
        }

        // Exactly the first call reached the terminal adapter.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let names = audit.captured_names();
        assert!(names.contains(&"execute_success".to_string()));
        assert!(names.contains(&"retry_duplicate_rejected".to_string()));
    }

    #[tokio::test]
    async fn action_failures_are_audited_and_propagated() {
        let (trust, guard, audit) = fixtures();
        let result: Result<(), ExecutionError<std::io::Error>> = execute(
            "see",
            &json!({}),
            false,
            false,
            &trust,
            &guard,
            &audit,
            || async {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "no camera"))
            },
        )
        .await;
        assert!(matches!(result, Err(ExecutionError::Action(_))));
        assert!(audit
            .captured_names()
            .contains(&"execute_failure".to_string()));
    }

    #[tokio::test]
    async fn payload_credentials_never_reach_the_audit_trail() {
        let (trust, guard, audit) = fixtures();
        let _: Result<(), ExecutionError<std::io::Error>> = execute(
            "run",
            &json!({"command": "echo", "api_key": "sk-123456"}),
            false,
            false,
            &trust,
            &guard,
            &audit,
            || async { Ok(()) },
        )
        .await;
        let attempt = &audit.captured()[0];
        assert_eq!(attempt["payload"]["api_key"], json!("[REDACTED:9 chars]"));
    }
}
