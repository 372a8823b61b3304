use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Daemon command
// ---------------------------------------------------------------------------

/// A command pulled from the backend's per-instance queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonCommand {
    /// Backend-assigned command id, echoed back on ack.
    pub id: String,
    /// Command name (`ping`, `run`, `see`, `notify`, `action_plan`, ...).
    pub name: String,
    /// Opaque command payload; shape depends on `name`.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the backend issued the command.
    #[serde(rename = "issuedAt", default)]
    pub issued_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversation result
// ---------------------------------------------------------------------------

/// Where a conversation turn was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Local,
    Backend,
}

/// The rendered outcome of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResult {
    pub response_text: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub model: String,
    pub source: AnswerSource,
}

// ---------------------------------------------------------------------------
// Activity ring buffer
// ---------------------------------------------------------------------------

/// One entry in the bounded recent-activity buffer surfaced by
/// `/debug/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub ts: DateTime<Utc>,
    pub kind: String,
    pub detail: String,
}

impl ActivityEvent {
    pub fn now(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

/// Append-at-head activity buffer with a fixed capacity.
///
/// Readers copy the contents; the buffer itself is guarded by the owner's
/// mutex and never escapes by reference.
#[derive(Debug)]
pub struct ActivityBuffer {
    entries: std::collections::VecDeque<ActivityEvent>,
    capacity: usize,
}

impl ActivityBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push the newest entry at the head, evicting the oldest past capacity.
    pub fn push(&mut self, event: ActivityEvent) {
        self.entries.push_front(event);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Snapshot newest-first.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
