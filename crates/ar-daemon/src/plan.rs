//! ActionPlan handling: parse the backend-emitted plan, enforce the CLEAR
//! decision, gate on confirmation, and execute actions serially with
//! per-action result reporting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use ar_backend::BackendClient;

use crate::adapters::{OperatorConsole, TerminalOutput};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// CLEAR 2.0 score attached by the backend audit engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearScore {
    #[serde(default)]
    pub clarity: f64,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub efficiency: f64,
    #[serde(default)]
    pub alignment: f64,
    #[serde(default)]
    pub resilience: f64,
    #[serde(default)]
    pub overall: f64,
    /// allow | confirm | block
    #[serde(default = "default_block")]
    pub decision: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_block() -> String {
    "block".to_string()
}

/// Atomic execution unit within a plan.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionDef {
    #[serde(alias = "id", default)]
    pub action_id: String,
    #[serde(alias = "agentId", default)]
    pub agent_id: String,
    #[serde(default)]
    pub capability: String,
    #[serde(default)]
    pub params: Value,
    #[serde(alias = "timeoutMs", default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Preserved for the backend to orchestrate; never executed here.
    #[serde(alias = "rollbackAction", default)]
    pub rollback_action: Option<Value>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Backend-emitted serial script of capability invocations.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionPlan {
    #[serde(alias = "id", default)]
    pub plan_id: String,
    #[serde(alias = "createdBy", default)]
    pub created_by: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(alias = "requiresConfirmation", default = "default_true")]
    pub requires_confirmation: bool,
    #[serde(alias = "idempotencyKey", default)]
    pub idempotency_key: String,
    #[serde(alias = "expiresAt", default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(alias = "clearScore", default)]
    pub clear_score: Option<ClearScore>,
    #[serde(default)]
    pub clear_decision: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

fn default_status() -> String {
    "planned".to_string()
}

fn default_true() -> bool {
    true
}

/// Parse a plan payload, resolving the CLEAR score and decision from
/// either `metadata` or the top level.
pub fn parse_plan(payload: &Value) -> Result<ActionPlan, String> {
    let mut plan: ActionPlan =
        serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;
    if plan.plan_id.trim().is_empty() {
        return Err("plan is missing an id".to_string());
    }

    if plan.clear_score.is_none() {
        if let Some(raw) = plan
            .metadata
            .as_ref()
            .and_then(|m| m.get("clear_score"))
            .cloned()
        {
            plan.clear_score = serde_json::from_value(raw).ok();
        }
    }
    if plan.clear_decision.is_none() {
        plan.clear_decision = plan
            .metadata
            .as_ref()
            .and_then(|m| m.get("clear_decision"))
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| plan.clear_score.as_ref().map(|s| s.decision.clone()));
    }
    Ok(plan)
}

impl ActionPlan {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ref expires_at) = self.expires_at else {
            return false;
        };
        match DateTime::parse_from_rfc3339(expires_at) {
            Ok(expires) => expires.with_timezone(&Utc) < now,
            // Unparseable expiry never blocks execution.
            Err(_) => false,
        }
    }

    fn short_id(&self) -> &str {
        let id = self.plan_id.as_str();
        &id[..id.len().min(8)]
    }
}

/// Per-action result submitted to `/plans/<id>/execute`. The daemon
/// generates a fresh execution id per attempt; `signature` stays absent
/// so the backend can sign.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub plan_id: String,
    pub action_id: String,
    pub agent_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub timestamp: String,
}

impl ExecutionResult {
    fn new(plan_id: &str, action_id: &str, agent_id: &str, status: &str) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            plan_id: plan_id.to_string(),
            action_id: action_id.to_string(),
            agent_id: agent_id.to_string(),
            status: status.to_string(),
            output: None,
            error: None,
            signature: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner seam
// ---------------------------------------------------------------------------

/// Executes `terminal.run` actions. Implemented by the orchestrator,
/// which wraps the terminal adapter in the governed execution pipeline
/// with confirmation required.
#[async_trait]
pub trait PlanRunner: Send + Sync {
    async fn run_command(&self, command: &str) -> Result<TerminalOutput, String>;
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Process one `action_plan` command payload end to end.
pub async fn handle_action_plan(
    payload: &Value,
    console: &dyn OperatorConsole,
    backend: Option<&BackendClient>,
    instance_id: &str,
    runner: &dyn PlanRunner,
) {
    let plan = match parse_plan(payload) {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "failed to parse action plan");
            console.print("Failed to parse ActionPlan");
            return;
        }
    };

    // Blocked plans never execute, regardless of any other field.
    if plan.clear_decision.as_deref() == Some("block") {
        reject_blocked_plan(&plan, console, backend, instance_id).await;
        return;
    }

    if plan.is_expired(Utc::now()) {
        console.print(&format!("ActionPlan {} has expired", plan.plan_id));
        return;
    }

    if let Some(ref score) = plan.clear_score {
        render_clear_summary(&plan, score, console);
    }

    if plan.requires_confirmation || plan.clear_decision.as_deref() == Some("confirm") {
        let approved = console
            .confirm(&format!(
                "Execute ActionPlan {}? ({} action(s))",
                plan.plan_id,
                plan.actions.len()
            ))
            .await;
        if !approved {
            console.print(&format!("ActionPlan {} rejected by user", plan.plan_id));
            return;
        }
    }

    execute_plan(&plan, console, backend, instance_id, runner).await;
}

async fn reject_blocked_plan(
    plan: &ActionPlan,
    console: &dyn OperatorConsole,
    backend: Option<&BackendClient>,
    instance_id: &str,
) {
    console.print(&format!("ActionPlan {} BLOCKED by CLEAR 2.0", plan.plan_id));
    if let Some(ref score) = plan.clear_score {
        console.print(&format!("  Overall: {:.3} -> BLOCK", score.overall));
        if let Some(ref notes) = score.notes {
            console.print(&format!("  Notes: {notes}"));
        }
    }

    let Some(backend) = backend else {
        return;
    };

    let mut result = ExecutionResult::new(&plan.plan_id, "*", instance_id, "rejected");
    result.error = Some(serde_json::json!({"reason": "CLEAR 2.0 blocked"}));
    submit_result(backend, &plan.plan_id, &result).await;

    if let Err(e) = backend.block_plan(&plan.plan_id).await {
        error!(plan_id = %plan.plan_id, error = %e, "failed to notify backend of rejection");
    }
}

fn render_clear_summary(plan: &ActionPlan, score: &ClearScore, console: &dyn OperatorConsole) {
    console.print(&format!("CLEAR 2.0 - Plan {}...", plan.short_id()));
    let dimensions = [
        ("C - Clarity", score.clarity),
        ("L - Leverage", score.leverage),
        ("E - Efficiency", score.efficiency),
        ("A - Alignment", score.alignment),
        ("R - Resilience", score.resilience),
    ];
    for (name, value) in dimensions {
        console.print(&format!("  {name:<16} {value:.2}"));
    }
    console.print(&format!(
        "  {:<16} {:.3} -> {}",
        "Overall",
        score.overall,
        score.decision.to_uppercase()
    ));
}

async fn execute_plan(
    plan: &ActionPlan,
    console: &dyn OperatorConsole,
    backend: Option<&BackendClient>,
    instance_id: &str,
    runner: &dyn PlanRunner,
) {
    console.print(&format!(
        "Executing ActionPlan {} ({} actions)",
        plan.plan_id,
        plan.actions.len()
    ));

    for action in &plan.actions {
        console.print(&format!(
            "  -> Action {} ({})",
            &action.action_id[..action.action_id.len().min(8)],
            action.capability
        ));

        let mut result = ExecutionResult::new(&plan.plan_id, &action.action_id, instance_id, "success");

        if action.capability == "terminal.run" {
            let command = action
                .params
                .get("command")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if command.is_empty() {
                result.status = "failure".to_string();
                result.error = Some(serde_json::json!({"reason": "Missing or empty command param"}));
            } else {
                match runner.run_command(command).await {
                    Ok(_) => {
                        result.output = Some(serde_json::json!({"command": command}));
                    }
                    Err(e) => {
                        result.status = "failure".to_string();
                        result.error = Some(serde_json::json!({"reason": e}));
                    }
                }
            }
        } else {
            console.print(&format!("    Unsupported capability: {}", action.capability));
            result.status = "failure".to_string();
            result.error = Some(serde_json::json!({
                "reason": format!("Unsupported capability: {}", action.capability)
            }));
        }

        if let Some(backend) = backend {
            submit_result(backend, &plan.plan_id, &result).await;
        }
        console.print(&format!("    {}", result.status));
    }

    console.print(&format!("ActionPlan {} completed", plan.plan_id));
}

/// Submission failures are logged and never stop the action loop.
async fn submit_result(backend: &BackendClient, plan_id: &str, result: &ExecutionResult) {
    let payload = match serde_json::to_value(result) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(plan_id, error = %e, "failed to serialize execution result");
            return;
        }
    };
    if let Err(e) = backend.submit_execution_result(plan_id, &payload).await {
        error!(
            plan_id,
            action_id = %result.action_id,
            error = %e,
            "failed to submit execution result"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
