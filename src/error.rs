//! Error types for the chiko session controller.

/// Top-level error type for the conversation session system.
#[derive(Debug, thiserror::Error)]
pub enum ChikoError {
    /// Reply gateway transport or protocol error.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Audio decode, device, or playback error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Avatar clip resolution error.
    #[error("avatar error: {0}")]
    Avatar(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChikoError>;
