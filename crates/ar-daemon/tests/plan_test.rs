mod common;

use serde_json::{json, Value};

use ar_core::types::DaemonCommand;
use ar_governance::TrustState;

use common::{harness, Harness, HarnessOptions};

fn action_plan_command(payload: Value) -> DaemonCommand {
    DaemonCommand {
        id: "plan-cmd".to_string(),
        name: "action_plan".to_string(),
        payload,
        issued_at: None,
    }
}

async fn full_trust(h: &Harness) {
    h.orch.bootstrap().await;
    assert_eq!(h.orch.trust_state(), TrustState::Full);
}

fn terminal_action(action_id: &str, command: &str) -> Value {
    json!({
        "action_id": action_id,
        "agent_id": "agent-1",
        "capability": "terminal.run",
        "params": {"command": command},
        "timeout_ms": 5000,
    })
}

#[tokio::test]
async fn blocked_plan_never_runs_and_reports_rejection() {
    let h = harness(HarnessOptions::default()).await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-blocked",
        "created_by": "policy",
        "origin": "backend",
        "status": "planned",
        "requires_confirmation": false,
        "actions": [terminal_action("a1", "rm -rf /")],
        "metadata": {
            "clear_score": {
                "clarity": 0.2, "leverage": 0.1, "efficiency": 0.1,
                "alignment": 0.1, "resilience": 0.1, "overall": 0.12,
                "decision": "block", "notes": "destructive"
            }
        },
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    // The terminal adapter was never invoked.
    assert!(h.terminal.commands.lock().unwrap().is_empty());

    // A synthetic rejection result went to /plans/<id>/execute.
    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 1);
    let (plan_id, result) = &executions[0];
    assert_eq!(plan_id, "p-blocked");
    assert_eq!(result["status"], json!("rejected"));
    assert_eq!(result["action_id"], json!("*"));
    assert_eq!(result["error"]["reason"], json!("CLEAR 2.0 blocked"));
    assert!(result.get("signature").is_none());

    // And the plan was blocked server-side.
    assert_eq!(h.state.plan_blocks.lock().unwrap().as_slice(), ["p-blocked"]);
    assert!(h.console.contains("BLOCKED by CLEAR 2.0"));
}

#[tokio::test]
async fn expired_plan_stops_without_backend_calls() {
    let h = harness(HarnessOptions::default()).await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-expired",
        "requires_confirmation": false,
        "expires_at": "2000-01-01T00:00:00Z",
        "actions": [terminal_action("a1", "echo hi")],
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    assert!(h.terminal.commands.lock().unwrap().is_empty());
    assert!(h.state.plan_executions.lock().unwrap().is_empty());
    assert!(h.state.plan_blocks.lock().unwrap().is_empty());
    assert!(h.console.contains("has expired"));
}

#[tokio::test]
async fn approved_plan_executes_actions_serially() {
    let h = harness(HarnessOptions::default()).await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-run",
        "requires_confirmation": false,
        "actions": [
            terminal_action("a1", "echo one"),
            terminal_action("a2", "echo two"),
        ],
        "metadata": {
            "clear_score": {
                "clarity": 0.9, "leverage": 0.9, "efficiency": 0.9,
                "alignment": 0.9, "resilience": 0.9, "overall": 0.9,
                "decision": "allow"
            }
        },
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    // Both actions ran, in plan order.
    assert_eq!(
        h.terminal.commands.lock().unwrap().as_slice(),
        ["echo one", "echo two"]
    );

    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].1["action_id"], json!("a1"));
    assert_eq!(executions[0].1["status"], json!("success"));
    assert_eq!(executions[1].1["action_id"], json!("a2"));
    // Fresh execution id per attempt.
    assert_ne!(
        executions[0].1["execution_id"],
        executions[1].1["execution_id"]
    );
    assert!(h.console.contains("ActionPlan p-run completed"));
}

#[tokio::test]
async fn confirm_decision_prompts_and_respects_rejection() {
    let h = harness(HarnessOptions {
        interactive: true,
        confirm_answer: false,
        ..HarnessOptions::default()
    })
    .await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-confirm",
        "requires_confirmation": false,
        "actions": [terminal_action("a1", "echo hi")],
        "metadata": {
            "clear_score": {
                "clarity": 0.6, "leverage": 0.5, "efficiency": 0.5,
                "alignment": 0.6, "resilience": 0.5, "overall": 0.55,
                "decision": "confirm"
            }
        },
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    assert!(h.terminal.commands.lock().unwrap().is_empty());
    assert!(h.state.plan_executions.lock().unwrap().is_empty());
    assert!(h.console.contains("rejected by user"));
    // The CLEAR table was shown before the prompt.
    assert!(h.console.contains("C - Clarity"));
}

#[tokio::test]
async fn allow_plan_runs_headlessly_with_confirmations_enabled() {
    // A CLEAR-allow plan with requires_confirmation=false never prompts;
    // the only gate on its terminal.run actions is the trust check in
    // the governed pipeline, so a headless daemon still executes it.
    let h = harness(HarnessOptions {
        interactive: false,
        confirm_answer: false,
        extra_env: vec![("CONFIRM_SENSITIVE_ACTIONS", "true")],
        ..HarnessOptions::default()
    })
    .await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-headless",
        "requires_confirmation": false,
        "actions": [terminal_action("a1", "echo hi")],
        "metadata": {
            "clear_score": {
                "clarity": 0.9, "leverage": 0.9, "efficiency": 0.9,
                "alignment": 0.9, "resilience": 0.9, "overall": 0.9,
                "decision": "allow"
            }
        },
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    assert_eq!(h.terminal.commands.lock().unwrap().as_slice(), ["echo hi"]);
    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].1["status"], json!("success"));
}

#[tokio::test]
async fn unsupported_capability_reports_failure_and_continues() {
    let h = harness(HarnessOptions::default()).await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-mixed",
        "requires_confirmation": false,
        "actions": [
            {"action_id": "a1", "agent_id": "g", "capability": "browser.open",
             "params": {"url": "https://example.com"}},
            terminal_action("a2", "echo after"),
        ],
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].1["status"], json!("failure"));
    assert!(executions[0].1["error"]["reason"]
        .as_str()
        .unwrap()
        .contains("Unsupported capability"));
    // The failure did not stop the loop.
    assert_eq!(executions[1].1["status"], json!("success"));
    assert_eq!(h.terminal.commands.lock().unwrap().as_slice(), ["echo after"]);
}

#[tokio::test]
async fn missing_command_param_is_a_failure_result() {
    let h = harness(HarnessOptions::default()).await;
    full_trust(&h).await;

    let payload = json!({
        "plan_id": "p-empty",
        "requires_confirmation": false,
        "actions": [
            {"action_id": "a1", "agent_id": "g", "capability": "terminal.run", "params": {}}
        ],
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].1["status"], json!("failure"));
    assert_eq!(
        executions[0].1["error"]["reason"],
        json!("Missing or empty command param")
    );
    assert!(h.terminal.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn governance_denial_becomes_action_failure() {
    // Registry never fetched: trust stays DEGRADED, so the governed run
    // inside the plan is denied and reported as a failure result.
    let h = harness(HarnessOptions::default()).await;
    h.state.registry_down.store(true, std::sync::atomic::Ordering::SeqCst);

    let payload = json!({
        "plan_id": "p-denied",
        "requires_confirmation": false,
        "actions": [terminal_action("a1", "echo hi")],
    });

    h.orch
        .handle_command(&action_plan_command(payload))
        .await
        .unwrap();

    assert!(h.terminal.commands.lock().unwrap().is_empty());
    let executions = h.state.plan_executions.lock().unwrap().clone();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].1["status"], json!("failure"));
    assert!(executions[0].1["error"]["reason"]
        .as_str()
        .unwrap()
        .contains("FULL"));
}

#[tokio::test]
async fn malformed_plan_payload_is_an_operator_error() {
    let h = harness(HarnessOptions::default()).await;
    h.orch
        .handle_command(&action_plan_command(json!({"actions": []})))
        .await
        .unwrap();
    assert!(h.console.contains("Failed to parse ActionPlan"));
    assert!(h.state.plan_executions.lock().unwrap().is_empty());
}
