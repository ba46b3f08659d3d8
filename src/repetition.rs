//! Repeated-question detection over a bounded history.
//!
//! The controller keeps the last few normalized user questions and flags a
//! new one as repeated when enough recent questions are near-duplicates of
//! it. Pure and deterministic; all thresholds come from
//! [`RepetitionConfig`](crate::config::RepetitionConfig).

use crate::config::RepetitionConfig;
use std::collections::{HashSet, VecDeque};

/// Bounded, ordered history of normalized user questions.
///
/// Oldest entries are evicted once the configured capacity is exceeded.
#[derive(Debug, Clone)]
pub struct QuestionHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl QuestionHistory {
    /// Create an empty history holding at most `capacity` questions.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of stored questions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalize and append a question, evicting the oldest beyond capacity.
    pub fn push(&mut self, question: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
        }
        self.entries.push_back(normalize(question));
    }

    /// Drop all stored questions.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Most recent `n` questions, newest last.
    fn recent(&self, n: usize) -> impl Iterator<Item = &String> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }
}

/// Check whether `candidate` is a near-duplicate of the recent history.
///
/// Counts how many of the last `config.window` prior questions are either
/// an exact (normalized) match or share at least `config.overlap_threshold`
/// token overlap with the candidate. Flags once the count reaches
/// `config.flag_threshold`.
pub fn is_repeated(history: &QuestionHistory, candidate: &str, config: &RepetitionConfig) -> bool {
    let candidate = normalize(candidate);
    if candidate.is_empty() {
        return false;
    }
    let candidate_tokens = tokenize(&candidate, config.min_token_chars);

    let hits = history
        .recent(config.window)
        .filter(|prior| {
            **prior == candidate
                || token_overlap(&candidate_tokens, &tokenize(prior, config.min_token_chars))
                    >= config.overlap_threshold
        })
        .count();

    hits >= config.flag_threshold
}

/// Lowercase, trim, and collapse runs of whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Alphanumeric tokens strictly longer than `min_chars`.
fn tokenize(text: &str, min_chars: usize) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > min_chars)
        .map(str::to_owned)
        .collect()
}

/// |A ∩ B| / max(|A|, |B|), or 0.0 when either set is empty.
fn token_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f32 / larger as f32
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn config() -> RepetitionConfig {
        RepetitionConfig::default()
    }

    fn history_of(questions: &[&str]) -> QuestionHistory {
        let mut h = QuestionHistory::new(config().history_len);
        for q in questions {
            h.push(q);
        }
        h
    }

    // ── Flagging policy ─────────────────────────────────────────────────

    #[test]
    fn third_identical_question_is_flagged() {
        let q = "why is the sky blue?";
        let mut h = QuestionHistory::new(10);

        assert!(!is_repeated(&h, q, &config()));
        h.push(q);
        assert!(!is_repeated(&h, q, &config()), "one prior hit is tolerated");
        h.push(q);
        assert!(is_repeated(&h, q, &config()), "two prior hits flag");
    }

    #[test]
    fn unrelated_questions_never_flag() {
        let questions = [
            "what time is it in tokyo",
            "how do volcanoes form",
            "recommend a pasta recipe",
        ];
        let mut h = QuestionHistory::new(10);
        for q in questions {
            assert!(!is_repeated(&h, q, &config()));
            h.push(q);
        }
    }

    #[test]
    fn near_duplicates_count_via_token_overlap() {
        // Same content words, different filler: overlap above 60%.
        let h = history_of(&[
            "why is the sky blue today",
            "so why is the sky blue then",
        ]);
        assert!(is_repeated(&h, "tell me why the sky is blue", &config()));
    }

    #[test]
    fn only_recent_window_is_considered() {
        let mut h = QuestionHistory::new(10);
        h.push("same question again");
        h.push("same question again");
        // Push enough unrelated questions that both duplicates leave the
        // 5-entry window.
        for q in [
            "first filler entry",
            "second filler entry",
            "third filler entry",
            "fourth filler entry",
            "fifth filler entry",
        ] {
            h.push(q);
        }
        assert!(!is_repeated(&h, "same question again", &config()));
    }

    #[test]
    fn normalization_ignores_case_and_spacing() {
        let h = history_of(&["Why   is the SKY blue?", "why is the sky blue?"]);
        assert!(is_repeated(&h, "WHY IS THE SKY BLUE?", &config()));
    }

    #[test]
    fn empty_candidate_is_never_flagged() {
        let h = history_of(&["", ""]);
        assert!(!is_repeated(&h, "   ", &config()));
    }

    // ── History bound ───────────────────────────────────────────────────

    #[test]
    fn history_evicts_oldest_beyond_capacity() {
        let mut h = QuestionHistory::new(3);
        for q in ["one", "two", "three", "four"] {
            h.push(q);
        }
        assert_eq!(h.len(), 3);
        let stored: Vec<_> = h.recent(3).cloned().collect();
        assert_eq!(stored, ["two", "three", "four"]);
    }

    #[test]
    fn clear_empties_history() {
        let mut h = history_of(&["a question", "another question"]);
        h.clear();
        assert!(h.is_empty());
    }

    // ── Overlap math ────────────────────────────────────────────────────

    #[test]
    fn short_tokens_are_ignored() {
        // "is", "it", "a" are all ≤ 2 chars and must not contribute.
        let a = tokenize("is it a whale", 2);
        assert_eq!(a, HashSet::from(["whale".to_owned()]));
    }

    #[test]
    fn overlap_is_fraction_of_larger_set() {
        let a = tokenize("alpha beta gamma delta", 2);
        let b = tokenize("alpha beta", 2);
        let overlap = token_overlap(&a, &b);
        assert!((overlap - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn overlap_of_empty_sets_is_zero() {
        assert_eq!(token_overlap(&HashSet::new(), &HashSet::new()), 0.0);
    }
}
