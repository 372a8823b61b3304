//! JSON-file memory store: bounded conversation log, counters, and
//! settings (including the persisted instance id). One file, replaced
//! atomically on every write; a single mutex serializes access from the
//! REPL, the scheduler, and the debug transport.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

pub const SETTING_INSTANCE_ID: &str = "instance_id";
pub const SETTING_FIRST_RUN: &str = "first_run";
pub const SETTING_TELEMETRY_CONSENT: &str = "telemetry_consent";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub user: String,
    pub ai: String,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MemoryData {
    #[serde(default)]
    conversations: Vec<ConversationRecord>,
    #[serde(default)]
    counters: BTreeMap<String, f64>,
    #[serde(default)]
    settings: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// File-backed memory adapter. All operations take `&self`; the inner
/// mutex is never held across I/O outside this module.
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    max_conversations: usize,
    inner: Mutex<MemoryData>,
}

impl MemoryStore {
    /// Open (or create) the store at `path`, keeping at most
    /// `max_conversations` entries.
    pub fn open(path: impl Into<PathBuf>, max_conversations: usize) -> Result<Self, MemoryError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "memory file unreadable, starting fresh");
                MemoryData::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            max_conversations: max_conversations.max(1),
            inner: Mutex::new(data),
        })
    }

    fn persist(path: &Path, data: &MemoryData) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn with_data<T>(
        &self,
        mutate: impl FnOnce(&mut MemoryData) -> T,
    ) -> Result<T, MemoryError> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let out = mutate(&mut guard);
        Self::persist(&self.path, &guard)?;
        Ok(out)
    }

    // -- settings ----------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.settings.get(key).cloned()
    }

    pub fn set_setting(&self, key: &str, value: serde_json::Value) -> Result<(), MemoryError> {
        self.with_data(|data| {
            data.settings.insert(key.to_string(), value);
        })
    }

    /// Return the persisted instance id, generating and storing a fresh
    /// UUID on first run.
    pub fn instance_id(&self) -> Result<String, MemoryError> {
        if let Some(serde_json::Value::String(id)) = self.get_setting(SETTING_INSTANCE_ID) {
            if !id.trim().is_empty() {
                return Ok(id);
            }
        }
        let id = Uuid::new_v4().to_string();
        self.with_data(|data| {
            data.settings.insert(
                SETTING_INSTANCE_ID.to_string(),
                serde_json::Value::String(id.clone()),
            );
            data.settings
                .entry(SETTING_FIRST_RUN.to_string())
                .or_insert_with(|| serde_json::Value::String(Utc::now().to_rfc3339()));
        })?;
        Ok(id)
    }

    // -- conversations -----------------------------------------------------

    pub fn add_conversation(
        &self,
        user: &str,
        ai: &str,
        tokens: u64,
        cost: f64,
    ) -> Result<(), MemoryError> {
        self.with_data(|data| {
            data.conversations.push(ConversationRecord {
                user: user.to_string(),
                ai: ai.to_string(),
                tokens,
                cost,
                ts: Utc::now(),
            });
            let max = self.max_conversations;
            if data.conversations.len() > max {
                let excess = data.conversations.len() - max;
                data.conversations.drain(..excess);
            }
        })
    }

    /// Most recent conversations, oldest first, at most `limit`.
    pub fn get_recent_conversations(&self, limit: usize) -> Vec<ConversationRecord> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let len = guard.conversations.len();
        let start = len.saturating_sub(limit);
        guard.conversations[start..].to_vec()
    }

    pub fn clear_conversations(&self) -> Result<(), MemoryError> {
        self.with_data(|data| data.conversations.clear())
    }

    // -- counters ----------------------------------------------------------

    pub fn increment_stat(&self, name: &str, amount: f64) -> Result<(), MemoryError> {
        self.with_data(|data| {
            *data.counters.entry(name.to_string()).or_insert(0.0) += amount;
        })
    }

    pub fn get_statistics(&self) -> BTreeMap<String, f64> {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.counters.clone()
    }

    pub fn reset_statistics(&self) -> Result<(), MemoryError> {
        self.with_data(|data| data.counters.clear())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
