//! `/api/vision` and `/api/transcribe` operations.

use serde_json::{json, Value};

use crate::client::BackendClient;
use crate::error::{BackendError, BackendResult};
use crate::models::{parse_transcription, parse_vision, TranscriptionResult, VisionResult};

impl BackendClient {
    /// Analyze a base64 image. Empty payloads are rejected client-side.
    pub async fn vision(
        &self,
        image_base64: &str,
        prompt: Option<&str>,
        temperature: Option<f32>,
        model: Option<&str>,
        max_tokens: Option<u32>,
        metadata: Option<Value>,
    ) -> BackendResult<VisionResult> {
        if image_base64.trim().is_empty() {
            return Err(BackendError::validation("imageBase64 is required"));
        }
        let mut body = json!({ "imageBase64": image_base64 });
        if let Some(prompt) = prompt {
            body["prompt"] = json!(prompt);
        }
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(model) = model {
            body["model"] = json!(model);
        }
        if let Some(max_tokens) = max_tokens {
            body["maxTokens"] = json!(max_tokens);
        }
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let value = self.request_json("POST", "/api/vision", Some(&body)).await?;
        parse_vision(&value)
    }

    /// Transcribe base64 audio. Empty payloads are rejected client-side.
    pub async fn transcribe(
        &self,
        audio_base64: &str,
        filename: Option<&str>,
        model: Option<&str>,
        language: Option<&str>,
        metadata: Option<Value>,
    ) -> BackendResult<TranscriptionResult> {
        if audio_base64.trim().is_empty() {
            return Err(BackendError::validation("audioBase64 is required"));
        }
        let mut body = json!({ "audioBase64": audio_base64 });
        if let Some(filename) = filename {
            body["filename"] = json!(filename);
        }
        if let Some(model) = model {
            body["model"] = json!(model);
        }
        if let Some(language) = language {
            body["language"] = json!(language);
        }
        if let Some(metadata) = metadata {
            body["metadata"] = metadata;
        }
        let value = self
            .request_json("POST", "/api/transcribe", Some(&body))
            .await?;
        parse_transcription(&value)
    }
}
