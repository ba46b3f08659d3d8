//! Emotion states and the heuristic reply classifier.
//!
//! Maps an assistant reply to one of 5 avatar emotion states. Two
//! classification layers:
//!
//! 1. **Explicit tag** — the gateway may return an `emotion` field for
//!    deterministic classification (alias-tolerant, e.g. `sad` → defeated).
//! 2. **Keyword heuristic** — ordered substring scan over the reply text
//!    when no usable tag is present; first matching group wins.
//!
//! The classifier is a pure function: identical input always yields the
//! same state.

use serde::{Deserialize, Serialize};

/// Discrete expressive mode driving the on-screen character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionState {
    /// Resting state; also the classifier default.
    Idle,
    /// Speaking animation.
    Talk,
    /// Greeting gesture.
    Wave,
    /// Irritated; forced by the repetition detector.
    Angry,
    /// Dejected / sad.
    Defeated,
}

impl EmotionState {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Talk => "talk",
            Self::Wave => "wave",
            Self::Angry => "angry",
            Self::Defeated => "defeated",
        }
    }

    /// Parse an explicit gateway emotion tag.
    ///
    /// Tolerates the aliases the backend has been seen to emit. Returns
    /// `None` for unknown tags so the caller can fall through to the
    /// keyword heuristic.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_lowercase().as_str() {
            "idle" | "neutral" | "rest" => Some(Self::Idle),
            "talk" | "talking" | "speak" | "speaking" => Some(Self::Talk),
            "wave" | "waving" | "hello" | "greet" | "happy" => Some(Self::Wave),
            "angry" | "mad" | "rage" => Some(Self::Angry),
            "defeated" | "defeat" | "sad" | "tired" => Some(Self::Defeated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmotionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for EmotionState {
    fn default() -> Self {
        Self::Idle
    }
}

// ── Keyword tables ──────────────────────────────────────────────────────

/// Ordered (state, keywords) groups. Order is the precedence: the first
/// group with any substring hit wins, so "angry" beats "talking" even when
/// both appear.
const KEYWORD_TABLE: &[(EmotionState, &[&str])] = &[
    (EmotionState::Angry, &["angry", "furious", "rage"]),
    (EmotionState::Wave, &["wave", "waving", "hello", "greet"]),
    (EmotionState::Defeated, &["defeat", "sad", "give up"]),
    (EmotionState::Talk, &["talk", "speak", "say"]),
];

/// Classify a reply into an emotion state.
///
/// An explicit `tag` (the gateway's `emotion` field) takes precedence when
/// it names a known state; otherwise the reply text is scanned
/// case-insensitively against [`KEYWORD_TABLE`]. No match yields
/// [`EmotionState::Idle`].
pub fn classify(tag: Option<&str>, text: &str) -> EmotionState {
    if let Some(tag) = tag
        && let Some(state) = EmotionState::from_tag(tag)
    {
        return state;
    }

    let lower = text.to_lowercase();
    for &(state, keywords) in KEYWORD_TABLE {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return state;
        }
    }
    EmotionState::Idle
}

// ── Tests ───────────────────────────────────────────────────────────────
