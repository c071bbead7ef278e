//! Error types for the update notifier

use thiserror::Error;

/// Main error type for the update notifier
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpdateError {
    /// Whether the error stems from the network or the remote peer being unreachable.
    ///
    /// These are recovered locally through retries and only surface as a
    /// connection status.
    pub fn is_connectivity(&self) -> bool {
        match self {
            UpdateError::Connectivity(_) | UpdateError::Handshake(_) => true,
            UpdateError::HttpError(e) => !e.is_decode(),
            _ => false,
        }
    }

    /// Whether the error means the peer answered with something we could not understand
    pub fn is_malformed(&self) -> bool {
        match self {
            UpdateError::MalformedResponse(_) | UpdateError::JsonError(_) => true,
            UpdateError::HttpError(e) => e.is_decode(),
            _ => false,
        }
    }
}
