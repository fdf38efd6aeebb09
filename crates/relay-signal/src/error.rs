//! Error types for the signal server

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Transport-level failures. Protocol problems inside an established session
/// are logged and dropped rather than surfaced here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("timed out waiting for request headers")]
    HandshakeTimeout,
}
