//! Error types for the portal protocol layer.

use std::time::Duration;
use thiserror::Error;

/// Errors from the wire / channel layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The remote end closed the stream cleanly.
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    /// The local channel (or the peer owning it) is gone.
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors surfaced to the caller of a remote method.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote method failed; only its message crosses the boundary.
    #[error("Remote error: {0}")]
    Remote(String),
    /// No `RETURN` arrived before the configured deadline.
    #[error("Call {id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },
    /// The proxy does not expose this method.
    #[error("Unknown method: {object}.{method}")]
    UnknownMethod { object: String, method: String },
    #[error(transparent)]
    Channel(#[from] WireError),
}

impl CallError {
    /// The remote failure text, if this is a remote error.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            CallError::Remote(msg) => Some(msg),
            _ => None,
        }
    }
}
