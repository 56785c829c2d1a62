//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error event to the originating connection).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (fatal at start-up)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message content is empty or blank
    #[error("Message content is empty")]
    EmptyContent,

    /// Malformed or otherwise invalid inbound event
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Messaging operation attempted without an authenticated identity
    #[error("Not authenticated")]
    Unauthorized,

    /// Presented session token is unknown
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// `authenticate` sent on an already authenticated connection
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Referenced identity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persistence backend failed; the operation may be retried
    #[error("Message store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The outbound queue is full; the event was dropped
    #[error("Channel full")]
    ChannelFull,
}
