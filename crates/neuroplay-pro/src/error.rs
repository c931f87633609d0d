//! # Error Types
//!
//! Semantic error types for the NeuroplayPro hub client. Most protocol-level
//! failures never reach the caller: a malformed frame is dropped at the codec
//! boundary and a bad streaming batch is skipped, both with a log line. The
//! variants below exist so those paths still carry a typed reason, and so the
//! async [`HubClient`](crate::client::HubClient) can report transport problems.

use thiserror::Error;

/// Convenient Result alias for hub operations.
pub type NeuroplayResult<T> = std::result::Result<T, NeuroplayError>;

/// All errors that can occur when talking to the NeuroplayPro hub.
#[derive(Error, Debug)]
pub enum NeuroplayError {
    // ─── Connection ─────────────────────────────────────────────────
    /// Failed to establish a WebSocket connection to the hub.
    #[error("Failed to connect to the hub at {url}: {reason}. Is NeuroplayPro running?")]
    ConnectionFailed { url: String, reason: String },

    /// WebSocket connection was lost after being established.
    #[error("Connection to the hub lost: {reason}")]
    ConnectionLost { reason: String },

    /// The client is not connected to the hub.
    #[error("Not connected to the hub")]
    NotConnected,

    /// The event loop that owns the connection has shut down.
    #[error("Hub event loop has stopped")]
    EventLoopStopped,

    // ─── Protocol ───────────────────────────────────────────────────
    /// An incoming frame was not a JSON object.
    #[error("Malformed hub message: {reason}")]
    MalformedMessage { reason: String },

    /// A grab-mode batch had a shape that cannot be reshaped into samples.
    #[error("Invalid data batch: {reason}")]
    InvalidBatch { reason: String },

    /// Received an unexpected payload from the hub.
    #[error("Protocol error: {reason}")]
    ProtocolError { reason: String },

    // ─── Devices ────────────────────────────────────────────────────
    /// No session is registered under the given ordinal id.
    #[error("Unknown device id {id}")]
    UnknownDevice { id: usize },

    // ─── Timeout ────────────────────────────────────────────────────
    /// An operation timed out.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── WebSocket ──────────────────────────────────────────────────
    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NeuroplayError {
    /// Returns `true` if this error indicates the connection is dead
    /// and the caller has to reopen it.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NeuroplayError::ConnectionFailed { .. }
                | NeuroplayError::ConnectionLost { .. }
                | NeuroplayError::NotConnected
                | NeuroplayError::WebSocket(_)
        )
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for NeuroplayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        NeuroplayError::WebSocket(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for NeuroplayError {
    fn from(err: toml::de::Error) -> Self {
        NeuroplayError::ConfigError {
            reason: err.to_string(),
        }
    }
}
