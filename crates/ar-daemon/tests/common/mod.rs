//! Shared fixtures for the daemon integration tests: a scriptable fake
//! backend, mock adapters, and an orchestrator harness wired to both.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use ar_core::config::Config;
use ar_core::config::EnvSnapshot;
use ar_daemon::adapters::{
    Adapters, AdapterError, AudioAdapter, NoopVision, OperatorConsole, TerminalAdapter,
    TerminalOutput,
};
use ar_daemon::llm_local::{LlmError, LlmResponse, LlmStream, LocalLlm, StreamEvent};
use ar_daemon::Orchestrator;

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// Scripted response entry: HTTP status, optional Retry-After seconds,
/// and a JSON body.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: Value,
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body,
        }
    }

    pub fn status(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            body,
        }
    }
}

#[derive(Default)]
pub struct BackendState {
    pub ask_bodies: Mutex<Vec<Value>>,
    pub ask_script: Mutex<VecDeque<Scripted>>,
    /// When set, `/api/daemon/registry` answers 500 so trust can never
    /// reach FULL.
    pub registry_down: AtomicBool,
    pub heartbeats: AtomicUsize,
    pub heartbeat_script: Mutex<VecDeque<Scripted>>,
    pub polls: AtomicUsize,
    pub poll_script: Mutex<VecDeque<Scripted>>,
    pub acks: Mutex<Vec<Value>>,
    pub confirms: Mutex<Vec<Value>>,
    pub updates: Mutex<Vec<Value>>,
    pub plan_executions: Mutex<Vec<(String, Value)>>,
    pub plan_blocks: Mutex<Vec<String>>,
}

impl BackendState {
    pub fn ask_count(&self) -> usize {
        self.ask_bodies.lock().unwrap().len()
    }

    pub fn push_ask(&self, response: Scripted) {
        self.ask_script.lock().unwrap().push_back(response);
    }

    pub fn push_poll(&self, response: Scripted) {
        self.poll_script.lock().unwrap().push_back(response);
    }

    pub fn push_heartbeat(&self, response: Scripted) {
        self.heartbeat_script.lock().unwrap().push_back(response);
    }
}

fn scripted_response(entry: Scripted) -> axum::response::Response {
    let mut builder = axum::response::Response::builder()
        .status(StatusCode::from_u16(entry.status).unwrap())
        .header("Content-Type", "application/json");
    if let Some(retry) = entry.retry_after {
        builder = builder.header("Retry-After", retry.to_string());
    }
    builder
        .body(axum::body::Body::from(entry.body.to_string()))
        .unwrap()
}

pub fn backend_router(state: Arc<BackendState>) -> Router {
    Router::new()
        .route(
            "/api/ask",
            post(
                |State(state): State<Arc<BackendState>>, Json(body): Json<Value>| async move {
                    state.ask_bodies.lock().unwrap().push(body.clone());
                    let scripted = state.ask_script.lock().unwrap().pop_front();
                    match scripted {
                        Some(entry) => scripted_response(entry),
                        None => {
                            let echoed = body
                                .get("message")
                                .and_then(Value::as_str)
                                .map(String::from)
                                .unwrap_or_else(|| {
                                    body.get("messages")
                                        .and_then(Value::as_array)
                                        .and_then(|m| m.last())
                                        .and_then(|m| m.get("content"))
                                        .and_then(Value::as_str)
                                        .unwrap_or("")
                                        .to_string()
                                });
                            Json(json!({
                                "result": format!("backend:{echoed}"),
                                "tokens": 11,
                                "cost": 0.02,
                                "model": "arc-core",
                            }))
                            .into_response()
                        }
                    }
                },
            ),
        )
        .route(
            "/api/daemon/registry",
            get(|State(state): State<Arc<BackendState>>| async move {
                if state.registry_down.load(Ordering::SeqCst) {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({"error": "registry offline"})),
                    )
                        .into_response();
                }
                Json(json!({
                    "endpoints": [{"method": "POST", "path": "/api/ask", "description": "core"}],
                    "modules": [{"id": "ARCANOS:RESEARCH", "description": "research", "route": "/api/ask"}],
                    "daemonTools": ["run_command"],
                    "core": ["CLEAR 2.0"],
                }))
                .into_response()
            }),
        )
        .route(
            "/api/daemon/heartbeat",
            post(|State(state): State<Arc<BackendState>>| async move {
                state.heartbeats.fetch_add(1, Ordering::SeqCst);
                let scripted = state.heartbeat_script.lock().unwrap().pop_front();
                match scripted {
                    Some(entry) => scripted_response(entry),
                    None => Json(json!({"ok": true})).into_response(),
                }
            }),
        )
        .route(
            "/api/daemon/commands",
            get(|State(state): State<Arc<BackendState>>| async move {
                state.polls.fetch_add(1, Ordering::SeqCst);
                let scripted = state.poll_script.lock().unwrap().pop_front();
                match scripted {
                    Some(entry) => scripted_response(entry),
                    None => Json(json!({"commands": []})).into_response(),
                }
            }),
        )
        .route(
            "/api/daemon/commands/ack",
            post(
                |State(state): State<Arc<BackendState>>, Json(body): Json<Value>| async move {
                    state.acks.lock().unwrap().push(body);
                    Json(json!({"ok": true}))
                },
            ),
        )
        .route(
            "/api/daemon/confirm-actions",
            post(
                |State(state): State<Arc<BackendState>>, Json(body): Json<Value>| async move {
                    state.confirms.lock().unwrap().push(body);
                    Json(json!({"queued": 2}))
                },
            ),
        )
        .route(
            "/api/update",
            post(
                |State(state): State<Arc<BackendState>>, Json(body): Json<Value>| async move {
                    state.updates.lock().unwrap().push(body);
                    Json(json!({"success": true}))
                },
            ),
        )
        .route(
            "/plans/{id}/execute",
            post(
                |Path(id): Path<String>,
                 State(state): State<Arc<BackendState>>,
                 Json(body): Json<Value>| async move {
                    state.plan_executions.lock().unwrap().push((id, body));
                    Json(json!({"ok": true}))
                },
            ),
        )
        .route(
            "/plans/{id}/block",
            post(
                |Path(id): Path<String>, State(state): State<Arc<BackendState>>| async move {
                    state.plan_blocks.lock().unwrap().push(id);
                    Json(json!({"status": "blocked"}))
                },
            ),
        )
        .with_state(state)
}

pub async fn spawn_backend(state: Arc<BackendState>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = backend_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Mock adapters
// ---------------------------------------------------------------------------

pub struct MockLlm;

#[async_trait]
impl LocalLlm for MockLlm {
    async fn ask(
        &self,
        message: &str,
        _system: Option<&str>,
        _history: &[ar_backend::ChatMessage],
    ) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse {
            text: format!("local:{message}"),
            tokens: 7,
            cost: 0.0,
        })
    }

    async fn ask_stream(
        &self,
        message: &str,
        system: Option<&str>,
        history: &[ar_backend::ChatMessage],
    ) -> Result<LlmStream, LlmError> {
        let response = self.ask(message, system, history).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![
            Ok(StreamEvent::Chunk(response.text)),
            Ok(StreamEvent::Usage {
                tokens: response.tokens,
                cost: response.cost,
            }),
        ])))
    }

    async fn ask_with_vision(
        &self,
        _message: &str,
        _image_base64: &str,
    ) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Unsupported("vision"))
    }

    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String, LlmError> {
        Ok("transcribed speech".to_string())
    }
}

#[derive(Default)]
pub struct MockTerminal {
    pub commands: Mutex<Vec<String>>,
}

#[async_trait]
impl TerminalAdapter for MockTerminal {
    async fn execute(
        &self,
        command: &str,
        _timeout: Duration,
        _elevated: bool,
    ) -> Result<TerminalOutput, AdapterError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(TerminalOutput {
            stdout: format!("ran:{command}"),
            stderr: String::new(),
            return_code: 0,
        })
    }
}

pub struct MockConsole {
    pub lines: Mutex<Vec<String>>,
    pub confirm_answer: AtomicBool,
    pub interactive: bool,
}

impl MockConsole {
    pub fn new(interactive: bool, confirm_answer: bool) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            confirm_answer: AtomicBool::new(confirm_answer),
            interactive,
        }
    }

    pub fn printed(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.printed().iter().any(|line| line.contains(needle))
    }
}

#[async_trait]
impl OperatorConsole for MockConsole {
    fn print(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn print_chunk(&self, chunk: &str) {
        self.lines.lock().unwrap().push(chunk.to_string());
    }

    async fn confirm(&self, _prompt: &str) -> bool {
        self.interactive && self.confirm_answer.load(Ordering::SeqCst)
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

pub struct MockAudio {
    pub captured: Option<Vec<u8>>,
}

#[async_trait]
impl AudioAdapter for MockAudio {
    async fn capture_microphone_audio(
        &self,
        _timeout: Duration,
        _phrase_limit: Duration,
    ) -> Result<Option<Vec<u8>>, AdapterError> {
        Ok(self.captured.clone())
    }

    fn extract_audio_bytes(&self, raw: &[u8]) -> Result<Vec<u8>, AdapterError> {
        Ok(raw.to_vec())
    }

    async fn speak(&self, _text: &str, _wait: bool) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orch: Arc<Orchestrator>,
    pub state: Arc<BackendState>,
    pub console: Arc<MockConsole>,
    pub terminal: Arc<MockTerminal>,
    pub data_dir: tempfile::TempDir,
}

impl Harness {
    /// Event names from the audit log, in order.
    pub fn audit_events(&self) -> Vec<String> {
        let path = self.data_dir.path().join("logs").join("audit.log");
        let Ok(text) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|v| v.get("event").and_then(Value::as_str).map(String::from))
            .collect()
    }
}

pub struct HarnessOptions {
    pub backend: bool,
    pub interactive: bool,
    pub confirm_answer: bool,
    pub extra_env: Vec<(&'static str, &'static str)>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            backend: true,
            interactive: false,
            confirm_answer: false,
            extra_env: Vec::new(),
        }
    }
}

pub async fn harness(options: HarnessOptions) -> Harness {
    let data_dir = tempfile::tempdir().unwrap();
    let state = Arc::new(BackendState::default());

    let mut snapshot = EnvSnapshot::empty();
    snapshot.set("ARCANOS_DATA_DIR", data_dir.path().to_str().unwrap());
    snapshot.set("STREAM_RESPONSES", "false");
    snapshot.set("CONFIRM_SENSITIVE_ACTIONS", "false");
    snapshot.set("DAEMON_HEARTBEAT_INTERVAL_SECONDS", "1");
    snapshot.set("DAEMON_COMMAND_POLL_INTERVAL_SECONDS", "1");
    if options.backend {
        let base = spawn_backend(state.clone()).await;
        snapshot.set("BACKEND_URL", base.as_str());
        snapshot.set("BACKEND_TOKEN", "test-token");
    }
    for (key, value) in &options.extra_env {
        snapshot.set(*key, *value);
    }

    let config = Config::from_sources(&snapshot).unwrap();

    let console = Arc::new(MockConsole::new(options.interactive, options.confirm_answer));
    let terminal = Arc::new(MockTerminal::default());
    let adapters = Adapters {
        llm: Arc::new(MockLlm),
        terminal: terminal.clone(),
        vision: Arc::new(NoopVision),
        audio: Arc::new(MockAudio { captured: None }),
        console: console.clone(),
    };

    let orch = Orchestrator::new(config, adapters).unwrap();
    Harness {
        orch,
        state,
        console,
        terminal,
        data_dir,
    }
}
