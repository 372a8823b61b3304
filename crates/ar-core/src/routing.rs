//! Conversation routing: decide per turn whether a message is answered by
//! the local model or the backend, and score backend confidence for the
//! hybrid mode gate.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Routing mode
// ---------------------------------------------------------------------------

/// Operator-configured routing policy (`BACKEND_ROUTING_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    Local,
    Backend,
    Hybrid,
}

impl RoutingMode {
    /// Parse a mode string; `None` for anything outside the allowed set.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "backend" => Some(Self::Backend),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Backend => "backend",
            Self::Hybrid => "hybrid",
        }
    }
}

// ---------------------------------------------------------------------------
// Route decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Backend,
}

/// Pure routing decision for a single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub route: Route,
    pub normalized_message: String,
    pub used_prefix: Option<String>,
}

impl RouteDecision {
    fn local(message: impl Into<String>) -> Self {
        Self {
            route: Route::Local,
            normalized_message: message.into(),
            used_prefix: None,
        }
    }

    fn backend(message: impl Into<String>, used_prefix: Option<String>) -> Self {
        Self {
            route: Route::Backend,
            normalized_message: message.into(),
            used_prefix,
        }
    }
}

/// Decide whether a message routes local or backend.
///
/// Empty messages stay local. `local`/`backend` modes force their route.
/// In hybrid mode the first matching deep prefix (case-insensitive) routes
/// backend with the prefix stripped; if stripping leaves nothing the
/// original trimmed message is kept. Everything else defaults local.
pub fn determine_route(
    user_message: &str,
    routing_mode: RoutingMode,
    deep_prefixes: &[String],
) -> RouteDecision {
    let normalized = user_message.trim();
    if normalized.is_empty() {
        return RouteDecision::local(user_message);
    }

    match routing_mode {
        RoutingMode::Backend => return RouteDecision::backend(normalized, None),
        RoutingMode::Local => return RouteDecision::local(normalized),
        RoutingMode::Hybrid => {}
    }

    for prefix in deep_prefixes {
        let trimmed_prefix = prefix.trim();
        if trimmed_prefix.is_empty() {
            continue;
        }
        let plen = trimmed_prefix.len();
        if normalized.len() >= plen
            && normalized.is_char_boundary(plen)
            && normalized[..plen].eq_ignore_ascii_case(trimmed_prefix)
        {
            let stripped = normalized[plen..].trim();
            let message = if stripped.is_empty() { normalized } else { stripped };
            return RouteDecision::backend(message, Some(trimmed_prefix.to_string()));
        }
    }

    RouteDecision::local(normalized)
}

// ---------------------------------------------------------------------------
// Backend confidence
// ---------------------------------------------------------------------------

const DOMAIN_KEYWORDS: &[&str] = &[
    "book",
    "booking",
    "match",
    "wrestling",
    "wwe",
    "aew",
    "wrestler",
    "storyline",
    "event",
    "tutor",
    "teach",
    "learn",
    "lesson",
    "education",
    "study",
    "game",
    "gaming",
    "play",
    "player",
    "walkthrough",
    "hotline",
    "research",
    "analyze",
    "investigate",
    "synthesize",
];

const COMPLEXITY_WORDS: &[&str] = &[
    "analyze",
    "research",
    "compare",
    "orchestrate",
    "plan",
    "brainstorm",
    "deep dive",
    "synthesize",
];

/// Phrases that mark a message as a local-only run/see intent.
const LOCAL_INTENT_PHRASES: &[&str] = &[
    "see screen",
    "see my screen",
    "see camera",
    "see my camera",
    "screenshot",
    "look at screen",
    "look at my screen",
    "capture screen",
    "capture my screen",
    "analyze screen",
    "analyze my screen",
    "webcam",
];

/// Heuristic confidence in [0, 1] that a turn belongs on the backend.
///
/// Base 0.5, +0.3 for a domain keyword, +0.2 for length > 200 or a
/// planning/reasoning verb, forced to 0.0 for run/see-style intents that
/// are always handled locally.
pub fn compute_backend_confidence(message: &str) -> f64 {
    let msg = message.trim();
    if msg.is_empty() {
        return 0.0;
    }

    let lower = msg.to_lowercase();
    if lower.starts_with("run ") || lower.starts_with("execute ") {
        return 0.0;
    }
    if LOCAL_INTENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return 0.0;
    }

    let mut score: f64 = 0.5;
    if DOMAIN_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        score += 0.3;
    }
    if msg.len() > 200 || COMPLEXITY_WORDS.iter().any(|w| lower.contains(w)) {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Domain hints
// ---------------------------------------------------------------------------

/// Ordered domain keyword dictionary; the first matching domain wins.
const DOMAIN_HINTS: &[(&str, &[&str])] = &[
    ("backstage:booker", &["booking", "book a match", "card", "storyline"]),
    ("backstage", &["wrestling", "wrestler", "wwe", "aew"]),
    ("arcanos:tutor", &["tutor me", "teach me"]),
    ("tutor", &["tutor", "lesson", "study plan", "education"]),
    ("arcanos:gaming", &["walkthrough", "hotline"]),
    ("gaming", &["game", "gaming", "player"]),
    ("research", &["research", "investigate", "synthesize"]),
];

/// Map a message to a backend `domain` hint via keyword presence.
pub fn detect_domain(message: &str) -> Option<&'static str> {
    let lower = message.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    DOMAIN_HINTS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(domain, _)| *domain)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
