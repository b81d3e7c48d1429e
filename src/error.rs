#![forbid(unsafe_code)]

// Error types for connecting, sending and configuring

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure while establishing a device connection: connect, authenticate,
/// register or subscribe. Fatal to the owning runner only.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection refused: {0}")]
    Refused(String),

    #[error("{action} rejected by server: {reason}")]
    Rejected { action: String, reason: String },

    #[error("Malformed {action} response: {reason}")]
    Protocol { action: String, reason: String },

    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("Connection closed")]
    Closed,
}

/// Failure while dispatching one notification. Never fatal to a session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("rejected by server (code {code:?}): {reason}")]
    Rejected { code: Option<u16>, reason: String },

    #[error("no response after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("{0}")]
    WebSocket(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Injected(String),
}

impl TransportError {
    /// Short name of the failure kind, used when reporting to the operator.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Rejected { .. } => "Rejected",
            TransportError::Timeout(_) => "Timeout",
            TransportError::Closed => "Closed",
            TransportError::WebSocket(_) => "WebSocket",
            TransportError::Encode(_) => "Encode",
            TransportError::Injected(_) => "Injected",
        }
    }
}

/// Failure before any work begins.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Wrong number of threads: {0}")]
    InvalidThreads(i64),

    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid {name}={value}")]
    InvalidOverride { name: &'static str, value: String },

    #[error("request_timeout_secs must be at least 1")]
    ZeroRequestTimeout,
}
