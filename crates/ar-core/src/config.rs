//! Layered environment configuration for the daemon.
//!
//! Hydration order (later sources win): packaged defaults, fallback dot-env
//! in the per-user data dir, primary dot-env next to the install, the
//! process environment, and finally an explicit override file named by
//! `ARCANOS_ENV_FILE`. The result is one immutable [`Config`] built at
//! startup and shared by reference; validation failures carry an ordered
//! list of human-readable errors and terminate the process with status 1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::routing::RoutingMode;

/// Token value left behind by the installer before credentials are seeded.
pub const PLACEHOLDER_TOKEN: &str = "REPLACE_WITH_BACKEND_TOKEN";

/// Template seeded into the user data dir on first use (never overwritten).
const ENV_TEMPLATE: &str = "\
# ARCANOS daemon configuration. Values here are overridden by the process
# environment and by ARCANOS_ENV_FILE.
#BACKEND_URL=
#BACKEND_TOKEN=REPLACE_WITH_BACKEND_TOKEN
#BACKEND_ROUTING_MODE=hybrid
#BACKEND_DEEP_PREFIXES=deep:,backend:
#BACKEND_CONFIDENCE_THRESHOLD=0.5
#DAEMON_HEARTBEAT_INTERVAL_SECONDS=30
#DAEMON_COMMAND_POLL_INTERVAL_SECONDS=5
#CONFIRM_SENSITIVE_ACTIONS=true
";

/// Defaults shipped with the daemon, applied before any file or env source.
fn packaged_defaults() -> &'static [(&'static str, &'static str)] {
    &[
        ("BACKEND_ROUTING_MODE", "hybrid"),
        ("BACKEND_DEEP_PREFIXES", "deep:,backend:"),
        ("CONFIRM_SENSITIVE_ACTIONS", "true"),
    ]
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more fields failed validation; messages are ordered.
    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Invalid(errors) => errors,
        }
    }
}

// ---------------------------------------------------------------------------
// EnvSnapshot
// ---------------------------------------------------------------------------

/// A flattened view over the layered env sources. Built once at startup;
/// tests construct snapshots directly for deterministic hydration.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert or overwrite a single variable (later layers win).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Merge a dot-env file if it exists; returns whether it was read.
    pub fn merge_dotenv_file(&mut self, path: &Path) -> bool {
        let iter = match dotenv::from_path_iter(path) {
            Ok(iter) => iter,
            Err(_) => return false,
        };
        let mut merged = false;
        for item in iter {
            match item {
                Ok((key, value)) => {
                    self.vars.insert(key, value);
                    merged = true;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping malformed dot-env entry");
                }
            }
        }
        merged
    }

    /// Merge the live process environment.
    pub fn merge_process_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.vars.insert(key, value);
        }
    }

    /// Build the full layered snapshot used by [`Config::load`].
    pub fn layered() -> Self {
        let mut snapshot = Self::empty();
        for (key, value) in packaged_defaults() {
            snapshot.set(*key, *value);
        }
        if let Some(fallback) = fallback_env_path() {
            snapshot.merge_dotenv_file(&fallback);
        }
        snapshot.merge_dotenv_file(&primary_env_path());
        snapshot.merge_process_env();
        if let Some(override_path) = std::env::var_os("ARCANOS_ENV_FILE") {
            let path = PathBuf::from(override_path);
            if !snapshot.merge_dotenv_file(&path) {
                warn!(path = %path.display(), "ARCANOS_ENV_FILE set but not readable");
            }
        }
        snapshot
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Trimmed, non-empty value.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get_nonempty(key).unwrap_or(default).to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_nonempty(key)
            .and_then(parse_bool)
            .unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_nonempty(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get_nonempty(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_nonempty(key).map(PathBuf::from)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Per-user data dir: `ARCANOS_DATA_DIR`, else the platform data dir,
/// else a dot-directory under the working directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("ARCANOS_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("arcanos"))
        .unwrap_or_else(|| PathBuf::from(".arcanos"))
}

fn fallback_env_path() -> Option<PathBuf> {
    Some(default_data_dir().join("arcanos.env"))
}

fn primary_env_path() -> PathBuf {
    PathBuf::from("arcanos.env")
}

/// Seed the packaged env template at the writable user location on first
/// use. Existing files are never overwritten.
pub fn seed_env_template() {
    let Some(path) = fallback_env_path() else {
        return;
    };
    if path.exists() {
        return;
    }
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    match std::fs::write(&path, ENV_TEMPLATE) {
        Ok(()) => info!(path = %path.display(), "seeded env template"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to seed env template"),
    }
}

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; `None` means the daemon runs backend-unconfigured.
    pub url: Option<String>,
    pub token: Option<String>,
    pub allow_http: bool,
    pub routing_mode: RoutingMode,
    pub deep_prefixes: Vec<String>,
    pub fallback_to_local: bool,
    pub confidence_threshold: f64,
    pub request_timeout_secs: u64,
    pub history_limit: usize,
    pub send_updates: bool,
    pub chat_model: Option<String>,
    pub vision_model: Option<String>,
    pub transcribe_model: Option<String>,
    pub vision_enabled: bool,
    pub transcribe_enabled: bool,
    pub registry_cache_ttl_minutes: u64,
}

impl BackendConfig {
    pub fn configured(&self) -> bool {
        self.url.is_some()
    }

    /// True when the token is absent, empty, or the installer placeholder.
    pub fn token_is_placeholder(&self) -> bool {
        match self.token.as_deref() {
            None => true,
            Some(token) => token.is_empty() || token == PLACEHOLDER_TOKEN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub client_id: String,
    pub heartbeat_interval_secs: u64,
    pub command_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub confirm_sensitive_actions: bool,
    pub run_elevated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_requests_per_hour: u64,
    pub max_tokens_per_day: u64,
    pub max_cost_per_day: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    pub memory_file: PathBuf,
    pub log_dir: PathBuf,
    pub max_conversations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugConfig {
    pub enabled: bool,
    pub port: u16,
    pub token: Option<String>,
    pub rate_limit_per_minute: u64,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream_responses: bool,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Process-wide, read-mostly configuration. Built once, passed by
/// reference; never a mutable singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub daemon: DaemonConfig,
    pub security: SecurityConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
    pub debug: DebugConfig,
    pub local_llm: LocalLlmConfig,
    pub version: String,
}

impl Config {
    /// Load from the layered sources, seeding the user env template on
    /// first use.
    pub fn load() -> Result<Self, ConfigError> {
        seed_env_template();
        let snapshot = EnvSnapshot::layered();
        let config = Self::from_sources(&snapshot)?;
        let dir_errors = config.check_directories();
        if !dir_errors.is_empty() {
            return Err(ConfigError::Invalid(dir_errors));
        }
        Ok(config)
    }

    /// Hydrate from a snapshot. Range and membership violations are
    /// collected in order and returned together.
    pub fn from_sources(snapshot: &EnvSnapshot) -> Result<Self, ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let url = snapshot
            .get_nonempty("BACKEND_URL")
            .map(|raw| raw.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());

        let routing_mode_raw = snapshot.get_string("BACKEND_ROUTING_MODE", "hybrid");
        let routing_mode = match RoutingMode::parse(&routing_mode_raw) {
            Some(mode) => mode,
            None => {
                errors.push(format!(
                    "BACKEND_ROUTING_MODE must be one of local|backend|hybrid, got `{routing_mode_raw}`"
                ));
                RoutingMode::Hybrid
            }
        };

        let confidence_threshold = range_f64(
            snapshot,
            "BACKEND_CONFIDENCE_THRESHOLD",
            0.5,
            0.0,
            1.0,
            &mut errors,
        );
        let request_timeout_secs =
            min_u64(snapshot, "BACKEND_REQUEST_TIMEOUT", 15, 1, &mut errors);
        let registry_cache_ttl_minutes =
            min_u64(snapshot, "REGISTRY_CACHE_TTL_MINUTES", 10, 1, &mut errors);
        let history_limit = min_u64(snapshot, "BACKEND_HISTORY_LIMIT", 8, 0, &mut errors) as usize;
        let heartbeat_interval_secs =
            min_u64(snapshot, "DAEMON_HEARTBEAT_INTERVAL_SECONDS", 30, 1, &mut errors);
        let command_poll_interval_secs =
            min_u64(snapshot, "DAEMON_COMMAND_POLL_INTERVAL_SECONDS", 5, 1, &mut errors);

        let base_dir = snapshot
            .get_path("ARCANOS_DATA_DIR")
            .unwrap_or_else(default_data_dir);
        let memory_file = base_dir.join(snapshot.get_string("MEMORY_FILE", "memories.json"));
        let log_dir = base_dir.join(snapshot.get_string("LOG_DIR", "logs"));

        let deep_prefixes: Vec<String> = snapshot
            .get_string("BACKEND_DEEP_PREFIXES", "deep:,backend:")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();

        let debug_port_raw = snapshot.get_int("DEBUG_SERVER_PORT", 9999);
        let debug_port = match u16::try_from(debug_port_raw) {
            Ok(port) => port,
            Err(_) => {
                errors.push(format!(
                    "DEBUG_SERVER_PORT must fit in 0..=65535, got `{debug_port_raw}`"
                ));
                9999
            }
        };

        let config = Config {
            backend: BackendConfig {
                url,
                token: snapshot.get_nonempty("BACKEND_TOKEN").map(String::from),
                allow_http: snapshot.get_bool("BACKEND_ALLOW_HTTP", false),
                routing_mode,
                deep_prefixes,
                fallback_to_local: snapshot.get_bool("BACKEND_FALLBACK_TO_LOCAL", true),
                confidence_threshold,
                request_timeout_secs,
                history_limit,
                send_updates: snapshot.get_bool("BACKEND_SEND_UPDATES", true),
                chat_model: snapshot.get_nonempty("BACKEND_CHAT_MODEL").map(String::from),
                vision_model: snapshot.get_nonempty("BACKEND_VISION_MODEL").map(String::from),
                transcribe_model: snapshot
                    .get_nonempty("BACKEND_TRANSCRIBE_MODEL")
                    .map(String::from),
                vision_enabled: snapshot.get_bool("BACKEND_VISION_ENABLED", false),
                transcribe_enabled: snapshot.get_bool("BACKEND_TRANSCRIBE_ENABLED", false),
                registry_cache_ttl_minutes,
            },
            daemon: DaemonConfig {
                client_id: snapshot.get_string("DAEMON_CLIENT_ID", "arcanos-daemon"),
                heartbeat_interval_secs,
                command_poll_interval_secs,
            },
            security: SecurityConfig {
                confirm_sensitive_actions: snapshot.get_bool("CONFIRM_SENSITIVE_ACTIONS", true),
                run_elevated: snapshot.get_bool("RUN_ELEVATED", false),
            },
            limits: LimitsConfig {
                max_requests_per_hour: min_u64(snapshot, "MAX_REQUESTS_PER_HOUR", 60, 1, &mut errors),
                max_tokens_per_day: min_u64(snapshot, "MAX_TOKENS_PER_DAY", 100_000, 0, &mut errors),
                max_cost_per_day: range_f64(
                    snapshot,
                    "MAX_COST_PER_DAY",
                    10.0,
                    0.0,
                    f64::MAX,
                    &mut errors,
                ),
            },
            storage: StorageConfig {
                base_dir,
                memory_file,
                log_dir,
                max_conversations: min_u64(snapshot, "MAX_CONVERSATIONS", 200, 1, &mut errors)
                    as usize,
            },
            debug: DebugConfig {
                enabled: snapshot.get_bool("DEBUG_SERVER_ENABLED", false),
                port: debug_port,
                token: snapshot.get_nonempty("DEBUG_SERVER_TOKEN").map(String::from),
                rate_limit_per_minute: min_u64(snapshot, "DEBUG_SERVER_RATE_LIMIT", 60, 1, &mut errors),
                metrics_enabled: snapshot.get_bool("DEBUG_SERVER_METRICS_ENABLED", true),
            },
            local_llm: LocalLlmConfig {
                base_url: snapshot.get_string("LOCAL_LLM_BASE_URL", "http://127.0.0.1:8000"),
                api_key: snapshot.get_nonempty("LOCAL_LLM_API_KEY").map(String::from),
                model: snapshot.get_string("LOCAL_LLM_MODEL", "local"),
                temperature: snapshot.get_float("TEMPERATURE", 0.7) as f32,
                max_tokens: snapshot.get_int("MAX_TOKENS", 2048).clamp(1, i64::from(u32::MAX))
                    as u32,
                stream_responses: snapshot.get_bool("STREAM_RESPONSES", true),
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Ensure the memory and log directories exist and are writable.
    pub fn check_directories(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut ensure = |label: &str, dir: &Path| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                errors.push(format!("{label} directory `{}` is not writable: {e}", dir.display()));
            }
        };
        if let Some(parent) = self.storage.memory_file.parent() {
            ensure("memory", parent);
        }
        ensure("log", &self.storage.log_dir);
        errors
    }
}

fn min_u64(
    snapshot: &EnvSnapshot,
    key: &str,
    default: u64,
    min: u64,
    errors: &mut Vec<String>,
) -> u64 {
    let raw = snapshot.get_nonempty(key);
    let value = match raw {
        None => default,
        Some(text) => match text.parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                errors.push(format!("{key} must be an integer, got `{text}`"));
                return default;
            }
        },
    };
    if value < min {
        errors.push(format!("{key} must be >= {min}, got {value}"));
        return default.max(min);
    }
    value
}

fn range_f64(
    snapshot: &EnvSnapshot,
    key: &str,
    default: f64,
    lo: f64,
    hi: f64,
    errors: &mut Vec<String>,
) -> f64 {
    let raw = snapshot.get_nonempty(key);
    let value = match raw {
        None => default,
        Some(text) => match text.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                errors.push(format!("{key} must be a number, got `{text}`"));
                return default;
            }
        },
    };
    if value < lo || value > hi {
        errors.push(format!("{key} must be within [{lo}, {hi}], got {value}"));
        return default;
    }
    value
}
