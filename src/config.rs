//! Configuration types for the conversation session controller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChikoConfig {
    /// Session identity and lifecycle settings.
    pub session: SessionConfig,
    /// Reply gateway endpoints.
    pub gateway: GatewayConfig,
    /// Repeated-question detection thresholds.
    pub repetition: RepetitionConfig,
    /// Idle-timeout and greeting durations.
    pub timing: TimingConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
    /// Avatar animation settings.
    pub avatar: AvatarConfig,
}

/// Session identity and lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Opaque user identifier sent with every gateway call.
    pub user_id: String,
    /// Fire a best-effort gateway reset when a session starts, clearing any
    /// server-side memory left over from a previous run.
    pub reset_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: "anon".to_owned(),
            reset_on_start: true,
        }
    }
}

/// Reply gateway endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Endpoint for normal conversation turns.
    pub ask_url: String,
    /// Endpoint for the memory-reset command (None = derived from
    /// `ask_url`, see [`GatewayConfig::effective_reset_url`]).
    pub reset_url: Option<String>,
    /// Same-origin audio proxy. Absolute `audio_url`s in replies are
    /// rewritten to `<audio_proxy>?url=<encoded>`; None passes them
    /// through untouched.
    pub audio_proxy: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ask_url: "http://127.0.0.1:5001/ask".to_owned(),
            reset_url: None,
            audio_proxy: None,
            request_timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// The reset endpoint: the configured one, or `ask_url` with a trailing
    /// `/ask` replaced by `/reset` (appended otherwise).
    pub fn effective_reset_url(&self) -> String {
        if let Some(ref url) = self.reset_url {
            return url.clone();
        }
        match self.ask_url.strip_suffix("/ask") {
            Some(base) => format!("{base}/reset"),
            None => format!("{}/reset", self.ask_url.trim_end_matches('/')),
        }
    }
}

/// Repeated-question detection configuration.
///
/// The defaults flag a question when at least 2 of the last 5 prior
/// questions match it exactly or share ≥60% token overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepetitionConfig {
    /// Maximum number of prior questions kept in history.
    pub history_len: usize,
    /// How many of the most recent prior questions are compared.
    pub window: usize,
    /// Tokens must be strictly longer than this many characters to count
    /// toward overlap.
    pub min_token_chars: usize,
    /// Token overlap (|intersection| / max(|A|,|B|)) at or above which two
    /// questions are considered near-duplicates.
    pub overlap_threshold: f32,
    /// Number of near-duplicate hits within the window that flags the
    /// candidate as repeated.
    pub flag_threshold: usize,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            history_len: 10,
            window: 5,
            min_token_chars: 2,
            overlap_threshold: 0.6,
            flag_threshold: 2,
        }
    }
}

/// Idle-timeout and greeting timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Base idle timeout after a reply with no audio, in ms.
    pub idle_base_ms: u64,
    /// Additional idle time per reply character, in ms.
    pub idle_per_char_ms: u64,
    /// Upper bound on the reply idle timeout, in ms.
    pub idle_max_ms: u64,
    /// Idle timeout after a failed turn, in ms.
    pub error_idle_ms: u64,
    /// Duration of the transient wave greeting after a reset, in ms.
    pub greeting_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_base_ms: 1_500,
            idle_per_char_ms: 40,
            idle_max_ms: 8_000,
            error_idle_ms: 1_500,
            greeting_ms: 2_000,
        }
    }
}

impl TimingConfig {
    /// Idle timeout proportional to reply length, clamped to the maximum.
    pub fn idle_timeout_for_reply(&self, reply_chars: usize) -> Duration {
        let ms = self
            .idle_base_ms
            .saturating_add(self.idle_per_char_ms.saturating_mul(reply_chars as u64))
            .min(self.idle_max_ms);
        Duration::from_millis(ms)
    }

    /// Idle timeout after a failed turn.
    pub fn error_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.error_idle_ms)
    }

    /// Duration of the post-reset wave greeting.
    pub fn greeting_duration(&self) -> Duration {
        Duration::from_millis(self.greeting_ms)
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Whether voice replies are played at all (the voice-enabled flag's
    /// initial value).
    pub voice_enabled: bool,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            output_device: None,
        }
    }
}

/// Avatar animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Crossfade duration between animation clips, in ms.
    pub crossfade_ms: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self { crossfade_ms: 200 }
    }
}

impl ChikoConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChikoError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChikoError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/chiko/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Ok(config) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("chiko").join("config.toml")
        } else if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("chiko").join("config.toml")
        } else {
            PathBuf::from("/tmp/chiko-config/config.toml")
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
