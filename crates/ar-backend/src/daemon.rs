//! Daemon-facing endpoints: registry, confirm-actions, update events, and
//! the raw heartbeat/poll/ack exchanges used by the scheduler.

use serde_json::{json, Value};

use crate::client::{BackendClient, RawResponse};
use crate::error::{BackendError, BackendResult};
use crate::models::ConfirmOutcome;

impl BackendClient {
    /// Fetch the opaque capability registry.
    pub async fn registry(&self) -> BackendResult<Value> {
        self.request_json("GET", "/api/daemon/registry", None).await
    }

    /// Approve a pending confirmation challenge; returns how many actions
    /// the backend queued.
    pub async fn confirm_daemon_actions(
        &self,
        confirmation_token: &str,
        instance_id: &str,
    ) -> BackendResult<ConfirmOutcome> {
        let body = json!({
            "confirmation_token": confirmation_token,
            "instanceId": instance_id,
        });
        let value = self
            .request_json("POST", "/api/daemon/confirm-actions", Some(&body))
            .await?;
        let queued = value.get("queued").and_then(Value::as_u64).unwrap_or(1);
        Ok(ConfirmOutcome { queued })
    }

    /// Record a usage/update event; returns the backend's `success` flag.
    pub async fn submit_update_event(
        &self,
        update_type: &str,
        data: Value,
        metadata: Option<Value>,
    ) -> BackendResult<bool> {
        if update_type.trim().is_empty() {
            return Err(BackendError::validation("updateType and data are required"));
        }
        let mut body = json!({ "updateType": update_type, "data": data });
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let value = self.request_json("POST", "/api/update", Some(&body)).await?;
        Ok(value.get("success").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Raw heartbeat POST; the scheduler interprets the status itself.
    pub async fn daemon_heartbeat(&self, body: &Value) -> BackendResult<RawResponse> {
        self.make_request("POST", "/api/daemon/heartbeat", Some(body))
            .await
    }

    /// Raw command poll for this instance.
    pub async fn daemon_commands(&self, instance_id: &str) -> BackendResult<RawResponse> {
        self.make_request(
            "GET",
            &format!("/api/daemon/commands?instance_id={instance_id}"),
            None,
        )
        .await
    }

    /// Acknowledge dispatched command ids.
    pub async fn daemon_ack(
        &self,
        command_ids: &[String],
        instance_id: &str,
    ) -> BackendResult<RawResponse> {
        let body = json!({ "commandIds": command_ids, "instanceId": instance_id });
        self.make_request("POST", "/api/daemon/commands/ack", Some(&body))
            .await
    }
}
