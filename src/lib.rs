//! Chiko: conversation session controller for a 3D avatar chat companion.
//!
//! Coordinates user text input, a remote reply gateway, speech playback,
//! and the on-screen character's emotional state:
//!
//! User text → repetition check → reply gateway → transcript + emotion
//! classification → audio playback → bounded return to idle
//!
//! # Architecture
//!
//! - **Session controller** ([`session`]): single point of mutation for
//!   the transcript, emotion, and voice flag; a `tokio::select!` loop
//!   driven through a cloneable [`SessionHandle`]
//! - **Reply gateway** ([`gateway`]): HTTP client for the conversational
//!   backend, with tolerant reply parsing and a best-effort reset command
//! - **Emotion classifier** ([`emotion`]): pure keyword/tag classifier
//! - **Repetition detector** ([`repetition`]): near-duplicate question
//!   flagging over a bounded history
//! - **Audio playback** ([`playback`]): the session's single playable
//!   audio slot, decoding via `symphonia` and rendering via `cpal`
//! - **Avatar clips** ([`avatar`]): one-time emotion → animation clip
//!   resolution

pub mod avatar;
pub mod config;
pub mod emotion;
pub mod error;
pub mod gateway;
pub mod playback;
pub mod repetition;
pub mod session;
pub mod speaker;

pub use config::ChikoConfig;
pub use emotion::EmotionState;
pub use error::{ChikoError, Result};
pub use gateway::{ConversationIdentity, ReplyGateway};
pub use session::{Message, Role, SessionController, SessionEvent, SessionHandle};
