//! Local LLM adapter speaking the OpenAI-compatible
//! `/v1/chat/completions` protocol served by vllm, llama.cpp, Ollama, and
//! similar local inference servers.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;

use ar_backend::ChatMessage;
use ar_core::config::LocalLlmConfig;

// ---------------------------------------------------------------------------
// Errors & results
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("request timed out")]
    Timeout,
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub tokens: u64,
    pub cost: f64,
}

/// Streaming yields zero or more text chunks and then exactly one usage
/// record (absent only on mid-stream error). Callers never parse usage
/// out of the text.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Usage { tokens: u64, cost: f64 },
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

// ---------------------------------------------------------------------------
// LocalLlm trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LocalLlm: Send + Sync {
    async fn ask(
        &self,
        message: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<LlmResponse, LlmError>;

    async fn ask_stream(
        &self,
        message: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<LlmStream, LlmError>;

    async fn ask_with_vision(
        &self,
        message: &str,
        image_base64: &str,
    ) -> Result<LlmResponse, LlmError>;

    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String, LlmError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

/// Client for a local OpenAI-compatible inference server. Auth is
/// optional; local inference can be slow, so the timeout is generous.
pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    config: LocalLlmConfig,
}

impl OpenAiCompatLlm {
    pub fn new(config: LocalLlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn build_messages(
        message: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for entry in history {
            messages.push(json!({"role": entry.role, "content": entry.content}));
        }
        messages.push(json!({"role": "user", "content": message}));
        messages
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionUsage {
    total_tokens: Option<u64>,
}

#[async_trait]
impl LocalLlm for OpenAiCompatLlm {
    async fn ask(
        &self,
        message: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<LlmResponse, LlmError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": Self::build_messages(message, system, history),
        });
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, message });
        }

        let parsed: CompletionResponse =
            resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;
        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| LlmError::Parse("no choices in response".into()))?;

        Ok(LlmResponse {
            text: choice.message.content.clone().unwrap_or_default(),
            tokens: parsed.usage.and_then(|u| u.total_tokens).unwrap_or(0),
            // Local inference is free; cost accounting stays zero.
            cost: 0.0,
        })
    }

    async fn ask_stream(
        &self,
        message: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<LlmStream, LlmError> {
        // Chunk passthrough over the non-streaming endpoint: one text
        // chunk followed by the terminal usage record. Callers already
        // tolerate any chunk count.
        let response = self.ask(message, system, history).await?;
        let events = vec![
            Ok(StreamEvent::Chunk(response.text)),
            Ok(StreamEvent::Usage {
                tokens: response.tokens,
                cost: response.cost,
            }),
        ];
        Ok(Box::pin(futures_util::stream::iter(events)))
    }

    async fn ask_with_vision(
        &self,
        _message: &str,
        _image_base64: &str,
    ) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Unsupported("local vision"))
    }

    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, LlmError> {
        Err(LlmError::Unsupported("local transcription"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_building_orders_system_history_user() {
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("sure")];
        let messages = OpenAiCompatLlm::build_messages("now", Some("sys"), &history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "earlier");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3], json!({"role": "user", "content": "now"}));
    }

    #[test]
    fn message_building_without_system() {
        let messages = OpenAiCompatLlm::build_messages("hi", None, &[]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }
}
