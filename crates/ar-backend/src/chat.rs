//! `/api/ask` operations: domain-routed asks and raw chat completions.

use serde_json::{json, Value};

use crate::client::BackendClient;
use crate::error::BackendResult;
use crate::models::{parse_chat, ChatMessage, ChatResult};

impl BackendClient {
    /// Single-message ask with an optional backend module domain hint.
    pub async fn ask_with_domain(
        &self,
        message: &str,
        domain: Option<&str>,
        metadata: Option<Value>,
    ) -> BackendResult<ChatResult> {
        let mut body = json!({ "message": message });
        if let Some(domain) = domain {
            body["domain"] = json!(domain);
        }
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let value = self.request_json("POST", "/api/ask", Some(&body)).await?;
        parse_chat(&value)
    }

    /// Full message-list completion through `/api/ask`.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        temperature: Option<f32>,
        model: Option<&str>,
        metadata: Option<Value>,
    ) -> BackendResult<ChatResult> {
        let mut body = json!({
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(model) = model {
            body["model"] = json!(model);
        }
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let value = self.request_json("POST", "/api/ask", Some(&body)).await?;
        parse_chat(&value)
    }

    /// Fetch backend-owned session state via the `/api/ask`
    /// `mode=system_state` convention. Returns the raw payload.
    pub async fn system_state(&self, metadata: Option<Value>) -> BackendResult<Value> {
        let mut body = json!({ "message": "", "mode": "system_state" });
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        self.request_json("POST", "/api/ask", Some(&body)).await
    }
}
