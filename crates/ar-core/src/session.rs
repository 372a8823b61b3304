//! Per-session conversation context: goal, intent, phase, and tone, plus
//! the helpers that keep the short-term summary safe to embed in a system
//! prompt.

use serde::{Deserialize, Serialize};

const INIT_TURN_THRESHOLD: u32 = 2;
const REFINING_CONFIDENCE_THRESHOLD: f64 = 0.55;
const SUMMARY_MAX_CHARS: usize = 280;
const SUMMARY_REDACTED_FALLBACK: &str = "Summary omitted due to instruction-like content.";

/// Tokens that mark a candidate summary as instruction-like. Summaries are
/// untrusted model output; anything resembling a directive is replaced
/// wholesale rather than embedded in the prompt.
const SUMMARY_INJECTION_TOKENS: &[&str] = &[
    "ignore",
    "follow",
    "instruction",
    "system prompt",
    "developer",
    "role",
    "assistant",
    "tool call",
    "act as",
    "you are",
    "override",
    "bypass",
    "jailbreak",
];

// ---------------------------------------------------------------------------
// Phase / tone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Active,
    Refining,
    Review,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Active => "active",
            Self::Refining => "refining",
            Self::Review => "review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Neutral,
    Precise,
    Creative,
    Critical,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Precise => "precise",
            Self::Creative => "creative",
            Self::Critical => "critical",
        }
    }
}

const PRECISE_INTENT_DOMAINS: &[&str] = &[
    "research",
    "debug",
    "analysis",
    "review",
    "tutor",
    "arcanos:tutor",
];

const CREATIVE_INTENT_DOMAINS: &[&str] = &["design", "brainstorm", "gaming", "arcanos:gaming"];

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

/// Mutable per-session conversation state. Owned by the orchestrator and
/// mutated only on the turn-handling path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Equal to the persisted instance id.
    pub session_id: String,
    pub conversation_goal: Option<String>,
    pub current_intent: Option<String>,
    pub intent_confidence: f64,
    pub phase: Phase,
    pub tone: Tone,
    pub turn_count: u32,
    pub short_term_summary: Option<String>,
    pub last_summary_turn: u32,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            conversation_goal: None,
            current_intent: None,
            intent_confidence: 0.0,
            phase: Phase::Init,
            tone: Tone::Neutral,
            turn_count: 0,
            short_term_summary: None,
            last_summary_turn: 0,
        }
    }

    /// Advance the turn counter and re-derive phase and tone.
    pub fn record_turn(&mut self) {
        self.turn_count = self.turn_count.saturating_add(1);
        self.phase = infer_phase(self.turn_count, self.intent_confidence);
        self.tone = infer_tone(self.current_intent.as_deref());
    }
}

/// Infer the conversation phase from turn count and intent confidence.
/// Early turns stay `Init` even when confidence rises quickly.
pub fn infer_phase(turn_count: u32, intent_confidence: f64) -> Phase {
    if turn_count < INIT_TURN_THRESHOLD {
        return Phase::Init;
    }
    if intent_confidence >= REFINING_CONFIDENCE_THRESHOLD {
        return Phase::Refining;
    }
    Phase::Active
}

/// Infer tone from the detected intent domain; unknown intents stay neutral.
pub fn infer_tone(intent: Option<&str>) -> Tone {
    let Some(intent) = intent else {
        return Tone::Neutral;
    };
    if PRECISE_INTENT_DOMAINS.contains(&intent) {
        return Tone::Precise;
    }
    if CREATIVE_INTENT_DOMAINS.contains(&intent) {
        return Tone::Creative;
    }
    Tone::Neutral
}

/// Sanitize an auto-generated summary before it is embedded into the system
/// prompt. Returns `None` for empty input; instruction-like content is
/// replaced with a static fallback marker.
pub fn sanitize_summary(candidate: &str) -> Option<String> {
    let normalized = candidate.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return None;
    }

    // Backticks and braces carry no summary signal but open delimiter-based
    // instruction smuggling.
    let normalized: String = normalized
        .chars()
        .filter(|c| !matches!(c, '`' | '{' | '}'))
        .collect();

    let lower = normalized.to_lowercase();
    if SUMMARY_INJECTION_TOKENS.iter().any(|t| lower.contains(t)) {
        return Some(SUMMARY_REDACTED_FALLBACK.to_string());
    }

    Some(normalized.chars().take(SUMMARY_MAX_CHARS).collect())
}

/// Detect prompts asking for the current working context ("what was I
/// working on"). Used to trigger the backend system-state hydrate.
pub fn is_working_context_query(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    const PHRASES: &[&str] = &[
        "what was i working on",
        "what am i working on",
        "what's my current intent",
        "what is my current intent",
        "current intent",
    ];
    PHRASES.iter().any(|p| normalized.contains(p))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
