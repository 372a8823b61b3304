//! The long-lived orchestrator: owns session, trust, memory, and the
//! device adapters; routes operator turns between the local model and
//! the backend; dispatches backend commands; and exposes the debug-host
//! surface.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use ar_backend::{
    BackendClient, BackendError, BackendErrorKind, BackendResult, ChatResult,
    ConfirmationChallenge,
};
use ar_core::config::Config;
use ar_core::memory::{MemoryError, MemoryStore};
use ar_core::routing::{
    compute_backend_confidence, detect_domain, determine_route, Route,
};
use ar_core::session::{self, SessionContext};
use ar_core::types::{ActivityBuffer, ActivityEvent, AnswerSource, ConversationResult, DaemonCommand};
use ar_governance::{ExecutionError, IdempotencyGuard, TrustRegistry, TrustState};
use ar_harness::rate_limiter::{RateLimitConfig, RateLimiter};
use ar_harness::ShutdownSignal;
use ar_telemetry::metrics::Labels;
use ar_telemetry::{AuditSink, MetricsCollector};

use crate::adapters::{Adapters, OperatorConsole, TerminalOutput};
use crate::llm_local::StreamEvent;
use crate::plan::{self, PlanRunner};
use crate::prompt;
use crate::scheduler::{self, SchedulerHandle};

const RUN_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SCREEN_PROMPT: &str = "Describe what is currently on the user's screen.";
const DEFAULT_CAMERA_PROMPT: &str = "Describe what the camera currently sees.";

// ---------------------------------------------------------------------------
// Errors and options
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("memory store: {0}")]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Why a conversation turn produced no answer.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("rate limit exceeded; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// Policy rejection: governance denial or confirmation declined.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Failed(String),
}

/// Per-turn knobs. `from_debug` marks turns arriving over the debug
/// transport; those may never approve a confirmation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnOptions {
    pub from_debug: bool,
    /// Suppresses streaming output (debug transport, fallbacks).
    pub programmatic: bool,
    /// Per-request override that skips the confidence gate.
    pub route_override: Option<Route>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Arc<Config>,
    audit: AuditSink,
    metrics: Arc<MetricsCollector>,
    memory: Arc<MemoryStore>,
    backend: Option<Arc<BackendClient>>,
    trust: Arc<TrustRegistry>,
    guard: IdempotencyGuard,
    operator_budget: RateLimiter,
    adapters: Adapters,
    session: Mutex<SessionContext>,
    /// Backend-owned routing preference (hydrated from system state).
    /// Defaults to backend so hybrid mode lets the confidence gate decide.
    preferred_route: Mutex<Route>,
    activity: Mutex<ActivityBuffer>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    shutdown: ShutdownSignal,
    instance_id: String,
    started_at: Instant,
}

impl Orchestrator {
    /// Build the orchestrator: persisted instance id, audit sink, memory,
    /// trust state, and the backend client when a URL is configured.
    /// Registry fetch and scheduler start happen in [`Self::bootstrap`].
    pub fn new(config: Config, adapters: Adapters) -> Result<Arc<Self>, OrchestratorError> {
        let audit = AuditSink::file(&config.storage.log_dir).unwrap_or_else(|e| {
            warn!(error = %e, "audit log unavailable, falling back to tracing sink");
            AuditSink::log_only()
        });

        let memory = Arc::new(MemoryStore::open(
            &config.storage.memory_file,
            config.storage.max_conversations,
        )?);
        let instance_id = memory.instance_id()?;

        let backend = match config.backend.url.as_deref() {
            Some(url) => {
                let env_fallback = config.backend.token.clone();
                let token_provider: ar_backend::TokenProvider = Arc::new(move || {
                    std::env::var("BACKEND_TOKEN")
                        .ok()
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .or_else(|| env_fallback.clone())
                });
                Some(Arc::new(BackendClient::new(
                    Some(url),
                    config.backend.allow_http,
                    token_provider,
                    config.backend.request_timeout_secs,
                    audit.clone(),
                )?))
            }
            None => None,
        };

        let trust = Arc::new(TrustRegistry::new(
            config.backend.registry_cache_ttl_minutes,
            audit.clone(),
        ));

        let orchestrator = Arc::new(Self {
            operator_budget: RateLimiter::new(RateLimitConfig::per_hour(
                config.limits.max_requests_per_hour,
            )),
            session: Mutex::new(SessionContext::new(&instance_id)),
            preferred_route: Mutex::new(Route::Backend),
            activity: Mutex::new(ActivityBuffer::new(200)),
            scheduler: Mutex::new(None),
            shutdown: ShutdownSignal::new(),
            metrics: Arc::new(MetricsCollector::new()),
            guard: IdempotencyGuard::default(),
            config: Arc::new(config),
            started_at: Instant::now(),
            instance_id,
            adapters,
            backend,
            memory,
            trust,
            audit,
        });

        info!(instance_id = %orchestrator.instance_id, "orchestrator constructed");
        Ok(orchestrator)
    }

    /// One best-effort registry fetch, initial trust computation, and
    /// scheduler startup when eligible.
    pub async fn bootstrap(self: &Arc<Self>) {
        if let Some(client) = self.backend.clone() {
            self.trust.refresh_registry(&client).await;
        }
        self.trust.recompute(self.backend_configured());

        let handle = scheduler::start(self);
        *self.scheduler.lock().unwrap_or_else(|p| p.into_inner()) = handle;
    }

    /// Trigger shutdown and join the scheduler loops with bounded
    /// timeouts.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.join().await;
        }
    }

    // -- accessors ---------------------------------------------------------

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> Option<Arc<BackendClient>> {
        self.backend.clone()
    }

    pub fn backend_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn audit(&self) -> AuditSink {
        self.audit.clone()
    }

    pub fn shutdown(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn trust_state(&self) -> TrustState {
        self.trust.current()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn console(&self) -> &dyn OperatorConsole {
        self.adapters.console.as_ref()
    }

    pub(crate) fn heartbeat_body(&self) -> Value {
        json!({
            "clientId": self.config.daemon.client_id,
            "instanceId": self.instance_id,
            "version": self.config.version,
            "uptime": self.uptime_seconds(),
            "routingMode": "http",
            "stats": {},
        })
    }

    fn backend_metadata(&self) -> Value {
        json!({
            "source": "daemon",
            "client": self.config.daemon.client_id,
            "instanceId": self.instance_id,
        })
    }

    fn append_activity(&self, kind: &str, detail: String) {
        let mut activity = self.activity.lock().unwrap_or_else(|p| p.into_inner());
        activity.push(ActivityEvent::now(kind, detail));
    }

    fn activity_snapshot(&self, limit: usize) -> Vec<ActivityEvent> {
        let activity = self.activity.lock().unwrap_or_else(|p| p.into_inner());
        activity.snapshot().into_iter().take(limit).collect()
    }

    fn session_snapshot(&self) -> SessionContext {
        self.session.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Current system prompt: identity, backend block (registry-derived
    /// only while the cache is fresh), session context.
    pub fn system_prompt(&self) -> String {
        let session = self.session_snapshot();
        let registry = if self.trust.is_valid() {
            self.trust.registry_snapshot()
        } else {
            None
        };
        prompt::build_system_prompt(&session, self.backend_configured(), registry.as_ref())
    }

    // -- conversation turns ------------------------------------------------

    /// Handle one operator turn end to end.
    pub async fn handle_turn(
        &self,
        message: &str,
        opts: TurnOptions,
    ) -> Result<ConversationResult, TurnError> {
        self.audit.record("execute_attempt", json!({"command": "ask"}));
        self.metrics.inc("arcanos_requests_total");

        if let Err(e) = self.operator_budget.check("operator") {
            let retry_after_secs = e.retry_after().as_secs().max(1);
            self.metrics.inc("arcanos_rate_limited_total");
            self.audit.record(
                "rate_limited",
                json!({"command": "ask", "retry_after_seconds": retry_after_secs}),
            );
            return Err(TurnError::RateLimited { retry_after_secs });
        }

        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(TurnError::Rejected("Empty message".to_string()));
        }

        // Backend-owned session state, hydrated when the operator asks
        // about their working context.
        if session::is_working_context_query(trimmed) {
            if let Some(client) = self.backend.clone() {
                match client.system_state(Some(self.backend_metadata())).await {
                    Ok(state) => self.hydrate_session_from_state(&state),
                    Err(e) => debug!(error = %e, "system state fetch failed"),
                }
            }
        }

        let decision = determine_route(
            trimmed,
            self.config.backend.routing_mode,
            &self.config.backend.deep_prefixes,
        );
        let mut route = decision.route;

        // In hybrid mode an unprefixed turn is still a backend candidate
        // when the backend-owned routing preference says so; the
        // confidence gate then makes the call.
        if route == Route::Local
            && self.config.backend.routing_mode == ar_core::routing::RoutingMode::Hybrid
            && decision.used_prefix.is_none()
            && self.backend.is_some()
            && *self.preferred_route.lock().unwrap_or_else(|p| p.into_inner()) == Route::Backend
        {
            route = Route::Backend;
        }

        if let Some(overridden) = opts.route_override {
            // Per-turn override skips the confidence gate entirely.
            route = overridden;
        } else if route == Route::Backend && decision.used_prefix.is_none() {
            // Strict less-than: a score equal to the threshold stays on
            // the backend.
            let confidence = compute_backend_confidence(&decision.normalized_message);
            if confidence < self.config.backend.confidence_threshold {
                debug!(
                    confidence,
                    threshold = self.config.backend.confidence_threshold,
                    "confidence gate downgraded turn to local"
                );
                route = Route::Local;
            }
        }

        // Streaming applies only to the direct local route; backend
        // answers and fallbacks arrive whole.
        let streamed = route == Route::Local
            && self.config.local_llm.stream_responses
            && !opts.programmatic
            && self.console().is_interactive();

        let result = match route {
            Route::Backend if self.backend.is_some() => {
                self.perform_backend_conversation(&decision.normalized_message, opts)
                    .await?
            }
            Route::Backend => {
                self.console().print("Backend is not configured.");
                self.local_conversation(&decision.normalized_message, true).await?
            }
            Route::Local => {
                self.local_conversation(&decision.normalized_message, opts.programmatic)
                    .await?
            }
        };

        // Streamed text already reached the console chunk by chunk.
        if !opts.programmatic && !streamed {
            self.console().print(&result.response_text);
        }

        self.finish_turn(trimmed, &result);
        Ok(result)
    }

    fn finish_turn(&self, user_message: &str, result: &ConversationResult) {
        if let Err(e) = self.memory.add_conversation(
            user_message,
            &result.response_text,
            result.tokens_used,
            result.cost_usd,
        ) {
            warn!(error = %e, "failed to persist conversation");
        }
        let _ = self.memory.increment_stat("total_tokens", result.tokens_used as f64);
        let _ = self.memory.increment_stat("total_cost", result.cost_usd);
        let _ = self.memory.increment_stat("total_conversations", 1.0);

        {
            let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
            session.record_turn();
        }
        self.append_activity("ask", format!("{} chars", user_message.len()));
        self.audit
            .record("execute_success", json!({"command": "ask"}));

        // Usage reporting is fire-and-forget; the turn never waits on it.
        if self.config.backend.send_updates {
            if let Some(client) = self.backend.clone() {
                let data = json!({
                    "tokens": result.tokens_used,
                    "cost": result.cost_usd,
                    "model": result.model,
                    "source": result.source,
                });
                let metadata = self.backend_metadata();
                tokio::spawn(async move {
                    if let Err(e) = client
                        .submit_update_event("conversation_usage", data, Some(metadata))
                        .await
                    {
                        debug!(error = %e, "conversation usage update failed");
                    }
                });
            }
        }
    }

    /// Hydrate local session fields from a backend system-state payload.
    /// Malformed sections are ignored.
    fn hydrate_session_from_state(&self, state: &Value) {
        if let Some(preferred) = state
            .get("routing")
            .and_then(|r| r.get("preferred"))
            .and_then(Value::as_str)
        {
            let mut preferred_route =
                self.preferred_route.lock().unwrap_or_else(|p| p.into_inner());
            match preferred {
                "local" => *preferred_route = Route::Local,
                "backend" => *preferred_route = Route::Backend,
                _ => {}
            }
        }

        let Some(intent) = state.get("intent") else {
            return;
        };
        let Some(intent_id) = intent.get("intentId").and_then(Value::as_str) else {
            return;
        };
        if intent_id.trim().is_empty() {
            return;
        }

        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(label) = intent.get("label").and_then(Value::as_str) {
            if !label.trim().is_empty() {
                session.current_intent = Some(label.trim().to_string());
                session.conversation_goal = Some(label.trim().to_string());
            }
        }
        if let Some(confidence) = intent.get("confidence").and_then(Value::as_f64) {
            session.intent_confidence = confidence.clamp(0.0, 1.0);
        }
        match intent.get("phase").and_then(Value::as_str) {
            Some("exploration") => session.phase = ar_core::session::Phase::Active,
            Some("execution") => session.phase = ar_core::session::Phase::Refining,
            _ => {}
        }
    }

    async fn backend_ask(
        &self,
        client: &BackendClient,
        message: &str,
        domain: Option<&str>,
    ) -> BackendResult<ChatResult> {
        let metadata = self.backend_metadata();
        if let Some(domain) = domain {
            return client
                .ask_with_domain(message, Some(domain), Some(metadata))
                .await;
        }
        let history = self
            .memory
            .get_recent_conversations(self.config.backend.history_limit);
        let system_prompt = self.system_prompt();
        let messages = prompt::build_conversation_messages(
            Some(&system_prompt),
            &history,
            message,
            self.config.backend.history_limit,
        );
        client
            .chat_completion(
                &messages,
                Some(self.config.local_llm.temperature),
                self.config.backend.chat_model.as_deref(),
                Some(metadata),
            )
            .await
    }

    async fn perform_backend_conversation(
        &self,
        message: &str,
        opts: TurnOptions,
    ) -> Result<ConversationResult, TurnError> {
        let Some(client) = self.backend.clone() else {
            return Err(TurnError::Failed("Backend is not configured.".to_string()));
        };

        // Refresh a stale registry before the turn so the prompt and the
        // trust computation both see current capabilities.
        if !self.trust.is_valid() {
            self.trust.refresh_registry(&client).await;
            self.trust.recompute(true);
        }

        let domain = detect_domain(message);
        let mut outcome = self.backend_ask(&client, message, domain).await;

        // One credential-refresh retry on auth failures.
        if matches!(&outcome, Err(e) if e.kind == BackendErrorKind::Auth) {
            if self.refresh_credentials() {
                outcome = self.backend_ask(&client, message, domain).await;
            }
        }

        match outcome {
            Ok(chat) => Ok(ConversationResult {
                response_text: chat.response_text,
                tokens_used: chat.tokens_used,
                cost_usd: chat.cost_usd,
                model: chat.model,
                source: AnswerSource::Backend,
            }),
            Err(err) if err.kind == BackendErrorKind::Confirmation => {
                self.handle_confirmation_required(&client, err, opts.from_debug)
                    .await
            }
            Err(err) => {
                self.report_backend_error("chat", &err);
                if self.config.backend.fallback_to_local {
                    self.trust.set_trust(TrustState::Degraded);
                    info!(kind = err.kind.as_str(), "falling back to local model");
                    self.local_conversation(message, true).await
                } else {
                    Err(TurnError::Failed(err.message))
                }
            }
        }
    }

    fn report_backend_error(&self, action_label: &str, error: &BackendError) {
        let status = error
            .status_code
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        self.console()
            .print(&format!("Backend {action_label} failed{status}: {}", error.message));
        if matches!(
            error.kind,
            BackendErrorKind::Network | BackendErrorKind::Timeout
        ) {
            self.console().print(
                "Check BACKEND_URL and ensure the backend server is running and reachable.",
            );
        }
    }

    /// Confirmation flow for a CONFIRMATION_REQUIRED challenge. Requires
    /// FULL trust; the debug transport and non-interactive input always
    /// reject.
    async fn handle_confirmation_required(
        &self,
        client: &BackendClient,
        err: BackendError,
        from_debug: bool,
    ) -> Result<ConversationResult, TurnError> {
        let Some(ConfirmationChallenge {
            challenge_id,
            pending_actions,
        }) = err.confirmation
        else {
            warn!("invalid confirmation payload received from backend");
            return Err(TurnError::Failed(
                "Invalid confirmation payload received from backend.".to_string(),
            ));
        };

        // The backend just proved reachable; recompute before gating.
        self.trust.recompute(true);
        if self.trust.current() != TrustState::Full {
            self.trust.set_trust(TrustState::Unsafe);
            self.audit.record(
                "governance_denial",
                json!({
                    "command": "backend_confirm",
                    "reason": "confirmation requires FULL trust; registry stale",
                    "trust": self.trust.current().as_str(),
                }),
            );
            return Err(TurnError::Rejected(
                "Action requires FULL trust for confirmation; registry stale.".to_string(),
            ));
        }

        if from_debug {
            self.audit.record(
                "governance_denial",
                json!({
                    "command": "backend_confirm",
                    "reason": "debug transport cannot approve confirmations",
                }),
            );
            return Err(TurnError::Rejected("Action rejected.".to_string()));
        }

        if self.config.security.confirm_sensitive_actions {
            if !self.console().is_interactive() {
                self.console().print("Action rejected.");
                return Err(TurnError::Rejected("Action rejected.".to_string()));
            }
            self.console()
                .print("ARCANOS: The following action needs your confirmation:");
            for action in &pending_actions {
                let summary = action
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| action.to_string());
                self.console().print(&format!("  {summary}"));
            }
            if !self.console().confirm("Confirm?").await {
                self.console().print("Action rejected.");
                return Err(TurnError::Rejected("Action rejected.".to_string()));
            }
        }

        let outcome = client
            .confirm_daemon_actions(&challenge_id, &self.instance_id)
            .await
            .map_err(|e| TurnError::Failed(e.message.clone()))?;

        let unit = if outcome.queued == 1 { "action" } else { "actions" };
        Ok(ConversationResult {
            response_text: format!("Queued {} {unit}.", outcome.queued),
            tokens_used: 0,
            cost_usd: 0.0,
            model: self
                .config
                .backend
                .chat_model
                .clone()
                .unwrap_or_else(|| "backend".to_string()),
            source: AnswerSource::Backend,
        })
    }

    async fn local_conversation(
        &self,
        message: &str,
        programmatic: bool,
    ) -> Result<ConversationResult, TurnError> {
        let system_prompt = self.system_prompt();
        let history = self
            .memory
            .get_recent_conversations(self.config.backend.history_limit);
        let history = prompt::history_messages(&history, self.config.backend.history_limit);

        let streaming = self.config.local_llm.stream_responses
            && !programmatic
            && self.console().is_interactive();

        if streaming {
            use futures_util::StreamExt;
            let mut stream = self
                .adapters
                .llm
                .ask_stream(message, Some(&system_prompt), &history)
                .await
                .map_err(|e| TurnError::Failed(e.to_string()))?;

            let mut text = String::new();
            let mut tokens = 0;
            let mut cost = 0.0;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(StreamEvent::Chunk(chunk)) => {
                        self.console().print_chunk(&chunk);
                        text.push_str(&chunk);
                    }
                    Ok(StreamEvent::Usage { tokens: t, cost: c }) => {
                        tokens = t;
                        cost = c;
                    }
                    Err(e) => return Err(TurnError::Failed(e.to_string())),
                }
            }
            self.console().print_chunk("\n");
            return Ok(ConversationResult {
                response_text: text,
                tokens_used: tokens,
                cost_usd: cost,
                model: self.config.local_llm.model.clone(),
                source: AnswerSource::Local,
            });
        }

        let response = self
            .adapters
            .llm
            .ask(message, Some(&system_prompt), &history)
            .await
            .map_err(|e| TurnError::Failed(e.to_string()))?;
        Ok(ConversationResult {
            response_text: response.text,
            tokens_used: response.tokens,
            cost_usd: response.cost,
            model: self.config.local_llm.model.clone(),
            source: AnswerSource::Local,
        })
    }

    /// Re-read credentials from the environment/store. Idempotent; the
    /// token provider already reads the environment on every request, so
    /// this is a presence check plus an audit record.
    fn refresh_credentials(&self) -> bool {
        let present = std::env::var("BACKEND_TOKEN")
            .ok()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
            || self.config.backend.token.is_some();
        self.audit
            .record("credential_refresh", json!({"token_present": present}));
        present
    }

    // -- voice -------------------------------------------------------------

    /// One-shot voice turn: microphone capture, transcription (backend
    /// when enabled, local otherwise), then a normal conversation turn.
    pub async fn handle_voice_turn(&self) -> Result<ConversationResult, TurnError> {
        let captured = self
            .adapters
            .audio
            .capture_microphone_audio(Duration::from_secs(8), Duration::from_secs(15))
            .await
            .map_err(|e| TurnError::Failed(e.to_string()))?;
        let Some(raw) = captured else {
            return Err(TurnError::Failed("No speech captured.".to_string()));
        };
        let audio = self
            .adapters
            .audio
            .extract_audio_bytes(&raw)
            .map_err(|e| TurnError::Failed(e.to_string()))?;

        let text = match self.backend.as_ref() {
            Some(client) if self.config.backend.transcribe_enabled => {
                let transcription = client
                    .transcribe(
                        &base64_encode(&audio),
                        Some("speech.wav"),
                        self.config.backend.transcribe_model.as_deref(),
                        None,
                        Some(self.backend_metadata()),
                    )
                    .await
                    .map_err(|e| TurnError::Failed(e.message.clone()))?;
                transcription.text
            }
            _ => self
                .adapters
                .llm
                .transcribe(&audio, "speech.wav")
                .await
                .map_err(|e| TurnError::Failed(e.to_string()))?,
        };

        self.handle_turn(&text, TurnOptions::default()).await
    }

    // -- backend command dispatch ------------------------------------------

    /// Parse one poll response and dispatch its commands serially, then
    /// acknowledge the ones that dispatched cleanly.
    pub async fn process_poll_payload(&self, payload: Option<Value>) {
        let Some(payload) = payload else {
            warn!("command poll returned an unparseable body");
            return;
        };
        let commands: Vec<DaemonCommand> = payload
            .get("commands")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        if commands.is_empty() {
            return;
        }

        let mut acked = Vec::new();
        for command in commands {
            let id = command.id.clone();
            match self.handle_command(&command).await {
                Ok(()) => acked.push(id),
                Err(e) => error!(command_id = %id, error = %e, "error handling command"),
            }
        }

        if acked.is_empty() {
            return;
        }
        let Some(client) = self.backend.clone() else {
            return;
        };
        match client.daemon_ack(&acked, &self.instance_id).await {
            Ok(raw) if raw.status != 200 => error!(status = raw.status, "command ack failed"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "command ack error"),
        }
    }

    /// Dispatch one backend command. An `Err` means the command did not
    /// take effect and must not be acknowledged.
    pub async fn handle_command(&self, command: &DaemonCommand) -> Result<(), String> {
        self.append_activity("command", format!("{}: {}", command.name, command.payload));
        self.metrics.inc_labeled(
            "arcanos_commands_total",
            Labels::new(&[("name", command.name.as_str())]),
        );

        match command.name.as_str() {
            // Informational; status and stats ride the heartbeat.
            "ping" | "get_status" | "get_stats" => Ok(()),
            "notify" => {
                match command.payload.get("message").and_then(Value::as_str) {
                    Some(message) if !message.is_empty() => {
                        self.console().print(&format!("Backend message: {message}"));
                    }
                    _ => self.console().print("Notify command missing message"),
                }
                Ok(())
            }
            "run" => {
                let text = command
                    .payload
                    .get("command")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("");
                if text.is_empty() {
                    self.console().print("Run command missing 'command' payload");
                    return Ok(());
                }
                self.handle_run(text, false).await.map(|_| ())
            }
            "see" => {
                let use_camera = command
                    .payload
                    .get("use_camera")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if let Err(e) = self.handle_see(use_camera).await {
                    // Vision failures are operator-visible but never
                    // poison the command queue.
                    self.console().print(&format!("See command failed: {e}"));
                }
                Ok(())
            }
            "action_plan" => {
                if command.payload.is_object() {
                    plan::handle_action_plan(
                        &command.payload,
                        self.console(),
                        self.backend.as_deref(),
                        &self.instance_id,
                        self,
                    )
                    .await;
                } else {
                    self.console().print("action_plan command missing payload");
                }
                Ok(())
            }
            other => {
                warn!(command = other, "unsupported command");
                self.console().print(&format!("Unsupported command: {other}"));
                Ok(())
            }
        }
    }

    /// Run a shell command through the governed pipeline. Privileged:
    /// the trust gate inside the pipeline is the sole arbiter.
    pub async fn handle_run(
        &self,
        command_text: &str,
        from_debug: bool,
    ) -> Result<TerminalOutput, String> {
        // The debug transport can never stand in for operator
        // confirmation of a sensitive action.
        if from_debug && self.config.security.confirm_sensitive_actions {
            self.audit.record(
                "governance_denial",
                json!({
                    "command": "run",
                    "reason": "debug transport cannot approve confirmations",
                }),
            );
            return Err("Action rejected.".to_string());
        }

        let payload = json!({"command": command_text});
        let elevated = self.config.security.run_elevated;
        let terminal = self.adapters.terminal.clone();
        let outcome = ar_governance::execute(
            "run",
            &payload,
            true,
            self.backend_configured(),
            &self.trust,
            &self.guard,
            &self.audit,
            || async move {
                terminal
                    .execute(command_text, RUN_COMMAND_TIMEOUT, elevated)
                    .await
            },
        )
        .await;

        match outcome {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    self.console().print(&output.stdout);
                }
                if !output.stderr.is_empty() {
                    self.console().print(&output.stderr);
                }
                Ok(output)
            }
            Err(ExecutionError::Duplicate { command }) => {
                let message = format!("Duplicate `{command}` command suppressed.");
                self.console().print(&message);
                Err(message)
            }
            Err(ExecutionError::Denied(denial)) => {
                let message = denial.to_string();
                self.console().print(&message);
                Err(message)
            }
            Err(ExecutionError::Action(e)) => {
                let message = format!("Command failed: {e}");
                self.console().print(&message);
                Err(message)
            }
        }
    }

    /// One vision analysis: backend when configured and enabled, local
    /// adapter otherwise. Not privileged.
    pub async fn handle_see(&self, use_camera: bool) -> Result<Value, String> {
        self.append_activity("see", if use_camera { "camera" } else { "screen" }.to_string());

        if let (Some(client), true) = (self.backend.as_ref(), self.config.backend.vision_enabled) {
            let image = if use_camera {
                self.adapters.vision.capture_camera(0, true).await
            } else {
                self.adapters.vision.capture_screenshot(true).await
            }
            .map_err(|e| e.to_string())?;
            let prompt_text = if use_camera {
                DEFAULT_CAMERA_PROMPT
            } else {
                DEFAULT_SCREEN_PROMPT
            };
            let result = client
                .vision(
                    &image,
                    Some(prompt_text),
                    Some(self.config.local_llm.temperature),
                    self.config.backend.vision_model.as_deref(),
                    Some(self.config.local_llm.max_tokens),
                    Some(self.backend_metadata()),
                )
                .await
                .map_err(|e| e.message.clone())?;
            self.console().print(&result.response_text);
            return Ok(json!({
                "response_text": result.response_text,
                "tokens_used": result.tokens_used,
                "cost_usd": result.cost_usd,
                "model": result.model,
                "source": "backend",
            }));
        }

        let (text, tokens, cost) = if use_camera {
            self.adapters.vision.see_camera().await
        } else {
            self.adapters.vision.see_screen().await
        }
        .map_err(|e| e.to_string())?;
        self.console().print(&text);
        Ok(json!({
            "response_text": text,
            "tokens_used": tokens,
            "cost_usd": cost,
            "source": "local",
        }))
    }
}

/// Minimal standalone base64 (RFC 4648) for audio upload payloads.
fn base64_encode(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(TABLE[(n >> 18) as usize & 63] as char);
        out.push(TABLE[(n >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(n >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[n as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

// ---------------------------------------------------------------------------
// PlanRunner
// ---------------------------------------------------------------------------

#[async_trait]
impl PlanRunner for Orchestrator {
    async fn run_command(&self, command: &str) -> Result<TerminalOutput, String> {
        self.handle_run(command, false).await
    }
}

// ---------------------------------------------------------------------------
// DebugHost
// ---------------------------------------------------------------------------

#[async_trait]
impl ar_bridge::DebugHost for Orchestrator {
    async fn status(&self) -> Value {
        json!({
            "instance_id": self.instance_id,
            "version": self.config.version,
            "uptime_seconds": self.uptime_seconds(),
            "backend_configured": self.backend_configured(),
            "trust": self.trust.current().as_str(),
            "activity": self.activity_snapshot(20),
        })
    }

    async fn readiness(&self) -> (bool, Value) {
        let memory_ok = self
            .memory
            .get_setting(ar_core::memory::SETTING_INSTANCE_ID)
            .is_some();
        let scheduler_running = self
            .scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(SchedulerHandle::is_running)
            .unwrap_or(false);
        let checks = json!({
            "config": true,
            "memory": memory_ok,
            "backend_configured": self.backend_configured(),
            "scheduler_running": scheduler_running,
        });
        (memory_ok, checks)
    }

    async fn debug_ask(&self, message: String) -> Result<Value, String> {
        let opts = TurnOptions {
            from_debug: true,
            programmatic: true,
            route_override: None,
        };
        match self.handle_turn(&message, opts).await {
            Ok(result) => serde_json::to_value(&result).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn debug_run(&self, command: String) -> Result<Value, String> {
        let output = self.handle_run(&command, true).await?;
        Ok(json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "return_code": output.return_code,
        }))
    }

    async fn debug_see(&self, use_camera: bool) -> Result<Value, String> {
        self.handle_see(use_camera).await
    }

    fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }
}
