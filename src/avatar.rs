//! Emotion-to-animation-clip resolution for the 3D character.
//!
//! Clip resolution happens exactly once, when the model's clip names are
//! known, producing an [`AnimationMap`] with a validated clip per emotion
//! state. Renderers then look clips up by [`EmotionState`] without any
//! per-transition string matching.

use crate::emotion::EmotionState;
use crate::error::{ChikoError, Result};

/// All emotion states, in the order used for resolution.
const ALL_STATES: [EmotionState; 5] = [
    EmotionState::Idle,
    EmotionState::Talk,
    EmotionState::Wave,
    EmotionState::Angry,
    EmotionState::Defeated,
];

/// Clip-name aliases per emotion state, in fallback order. Matching is
/// case-insensitive: an exact name match on any alias wins, then a
/// substring match (rigs exported from animation libraries often carry
/// names like "Waving Gesture" or "mixamo.com").
fn aliases(state: EmotionState) -> &'static [&'static str] {
    match state {
        EmotionState::Idle => &["idle", "mixamo.com", "rest", "breathing", "standing", "stand"],
        EmotionState::Wave => &["waving", "wave", "hello", "greet"],
        EmotionState::Talk => &["talking", "talk", "speak", "speaking"],
        EmotionState::Angry => &["angry", "rage", "mad"],
        EmotionState::Defeated => &["defeated", "sad", "defeat", "tired"],
    }
}

/// A resolved clip: its index in the model's clip list and its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipHandle {
    /// Index into the clip list the map was resolved from.
    pub index: usize,
    /// The clip's original name.
    pub name: String,
}

/// Pre-resolved mapping from emotion state to animation clip.
#[derive(Debug, Clone)]
pub struct AnimationMap {
    clips: [ClipHandle; 5],
}

impl AnimationMap {
    /// Resolve every emotion state against the model's clip names.
    ///
    /// For each state the alias list is walked in order; the first exact
    /// case-insensitive match wins, then the first substring match. States
    /// with no alias hit fall back to the resolved idle clip; idle itself
    /// falls back to the first clip in the list.
    ///
    /// # Errors
    ///
    /// Returns an error if `clip_names` is empty.
    pub fn resolve(clip_names: &[String]) -> Result<Self> {
        if clip_names.is_empty() {
            return Err(ChikoError::Avatar("model has no animation clips".into()));
        }

        let lower: Vec<String> = clip_names.iter().map(|n| n.to_lowercase()).collect();

        let find = |state: EmotionState| -> Option<usize> {
            for alias in aliases(state) {
                if let Some(i) = lower.iter().position(|n| n == alias) {
                    return Some(i);
                }
            }
            for alias in aliases(state) {
                if let Some(i) = lower.iter().position(|n| n.contains(alias)) {
                    return Some(i);
                }
            }
            None
        };

        let idle_index = find(EmotionState::Idle).unwrap_or(0);
        let handle = |index: usize| ClipHandle {
            index,
            name: clip_names[index].clone(),
        };

        let clips = ALL_STATES.map(|state| match state {
            EmotionState::Idle => handle(idle_index),
            other => handle(find(other).unwrap_or(idle_index)),
        });

        Ok(Self { clips })
    }

    /// The clip resolved for `state`.
    pub fn clip_for(&self, state: EmotionState) -> &ClipHandle {
        let slot = ALL_STATES
            .iter()
            .position(|s| *s == state)
            .unwrap_or_default();
        &self.clips[slot]
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn resolves_typical_mixamo_rig() {
        let map = AnimationMap::resolve(&names(&[
            "mixamo.com",
            "Talking",
            "Waving Gesture",
            "Defeated",
            "Angry",
        ]))
        .unwrap();

        assert_eq!(map.clip_for(EmotionState::Idle).name, "mixamo.com");
        assert_eq!(map.clip_for(EmotionState::Talk).name, "Talking");
        assert_eq!(map.clip_for(EmotionState::Wave).name, "Waving Gesture");
        assert_eq!(map.clip_for(EmotionState::Angry).name, "Angry");
        assert_eq!(map.clip_for(EmotionState::Defeated).name, "Defeated");
    }

    #[test]
    fn exact_match_beats_substring_match() {
        // "wave" appears as a substring of the first clip, but an exact
        // alias match exists later in the list and must win.
        let map = AnimationMap::resolve(&names(&["microwave dance", "Wave", "Idle"])).unwrap();
        assert_eq!(map.clip_for(EmotionState::Wave).name, "Wave");
    }

    #[test]
    fn missing_state_falls_back_to_idle_clip() {
        let map = AnimationMap::resolve(&names(&["Idle", "Talking"])).unwrap();
        assert_eq!(map.clip_for(EmotionState::Angry).name, "Idle");
        assert_eq!(map.clip_for(EmotionState::Wave).name, "Idle");
    }

    #[test]
    fn missing_idle_falls_back_to_first_clip() {
        let map = AnimationMap::resolve(&names(&["Samba Dancing", "Talking"])).unwrap();
        assert_eq!(map.clip_for(EmotionState::Idle).name, "Samba Dancing");
        assert_eq!(map.clip_for(EmotionState::Idle).index, 0);
    }

    #[test]
    fn resolution_is_deterministic() {
        let clips = names(&["Idle", "Talking", "Waving", "Angry", "Defeated"]);
        let a = AnimationMap::resolve(&clips).unwrap();
        let b = AnimationMap::resolve(&clips).unwrap();
        for state in ALL_STATES {
            assert_eq!(a.clip_for(state), b.clip_for(state));
        }
    }

    #[test]
    fn empty_clip_list_is_an_error() {
        assert!(AnimationMap::resolve(&[]).is_err());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let map = AnimationMap::resolve(&names(&["IDLE", "TALKING"])).unwrap();
        assert_eq!(map.clip_for(EmotionState::Talk).name, "TALKING");
    }
}
