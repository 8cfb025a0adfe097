//! Error types for node commands.
//!
//! Validation and lifecycle failures are returned before anything is sent.
//! Everything that can go wrong after a frame left the client arrives
//! through the [`CommandHandle`](crate::node::correlation::CommandHandle).

use thiserror::Error;

/// Main error type for node operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A filter field is out of range or a mandatory command field is missing.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Command issued on a destroyed player session.
    #[error("player for guild {guild_id} has been destroyed")]
    Lifecycle { guild_id: u64 },

    /// The caller abandoned the pending command.
    #[error("command {token} was cancelled")]
    Cancelled { token: String },

    /// No echo arrived before the command's deadline.
    #[error("command {token} timed out waiting for the node")]
    Timeout { token: String },

    /// The connection to the node was lost while the command was pending.
    #[error("connection to node lost")]
    ConnectionLost,

    /// The outgoing sink refused a frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// An encoded track could not be decoded.
    #[error("track decode error: {0}")]
    TrackDecode(String),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns `true` for failures reported before any frame was sent.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Lifecycle { .. })
    }
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;
