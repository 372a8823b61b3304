//! ActionPlan lifecycle endpoints: fetch, approve, execute-result, block.

use serde_json::{json, Value};

use crate::client::BackendClient;
use crate::error::BackendResult;

impl BackendClient {
    pub async fn fetch_plan(&self, plan_id: &str) -> BackendResult<Value> {
        self.request_json("GET", &format!("/plans/{plan_id}"), None)
            .await
    }

    pub async fn approve_plan(&self, plan_id: &str) -> BackendResult<Value> {
        self.request_json("POST", &format!("/plans/{plan_id}/approve"), Some(&json!({})))
            .await
    }

    /// Submit one per-action `ExecutionResult`. Callers treat failures as
    /// non-fatal; the plan loop continues regardless.
    pub async fn submit_execution_result(
        &self,
        plan_id: &str,
        result: &Value,
    ) -> BackendResult<Value> {
        self.request_json("POST", &format!("/plans/{plan_id}/execute"), Some(result))
            .await
    }

    pub async fn block_plan(&self, plan_id: &str) -> BackendResult<Value> {
        self.request_json("POST", &format!("/plans/{plan_id}/block"), Some(&json!({})))
            .await
    }
}
