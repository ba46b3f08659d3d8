//! Message and event types for the conversation session.

use crate::emotion::EmotionState;
use serde::{Deserialize, Serialize};

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person typing.
    User,
    /// The avatar's reply.
    Assistant,
    /// Local status lines (failures, notices); never sent to the gateway.
    System,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// A local system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Commands accepted by the session controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Submit user text for a conversation turn.
    Submit(String),
    /// Clear the session and notify the gateway (best-effort).
    Reset,
    /// Enable or disable voice playback.
    SetVoiceEnabled(bool),
    /// Manual emotion override (demo/testing controls).
    SetEmotion(EmotionState),
    /// Request a copy of the current session state.
    Snapshot(tokio::sync::oneshot::Sender<SessionSnapshot>),
    /// Stop the controller loop.
    Shutdown,
}

/// Events broadcast to session observers (UI, console, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message was appended to the transcript.
    MessageAppended(Message),
    /// The avatar's emotion state changed.
    EmotionChanged(EmotionState),
    /// The transcript was cleared by a reset.
    TranscriptCleared,
}

/// Point-in-time copy of session state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Full transcript, oldest first.
    pub transcript: Vec<Message>,
    /// Current emotion state.
    pub emotion: EmotionState,
    /// Whether voice playback is enabled.
    pub voice_enabled: bool,
    /// Whether a submission is currently in flight.
    pub pending: bool,
}
