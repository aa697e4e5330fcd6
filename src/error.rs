//! Unified error types for the CDP relay

use std::net;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the relay, covering the taxonomy from the design
/// document: protocol framing, extension-link failures, routing failures,
/// and recording failures.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network/address errors
    #[error("Network error: {0}")]
    Net(#[from] net::AddrParseError),

    /// A frame was not valid CDP JSON, or mixed `id` and `method` with no `params`.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No `/extension` socket is currently attached.
    #[error("Extension not connected")]
    ExtensionUnavailable,

    /// The active extension socket was replaced by a newer connection.
    #[error("Extension connection replaced")]
    ExtensionReplaced,

    /// A request to the extension was not answered within its deadline.
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// The named CDP session no longer exists (target gone or client detached).
    #[error("No session with given id: {0}")]
    SessionNotFound(String),

    /// The named target does not exist.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The named client connection does not exist.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Token/handshake authentication failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A recording operation failed.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal state.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new session-not-found error
    pub fn session_not_found<S: Into<String>>(id: S) -> Self {
        Error::SessionNotFound(id.into())
    }

    /// Create a new target-not-found error
    pub fn target_not_found<S: Into<String>>(id: S) -> Self {
        Error::TargetNotFound(id.into())
    }

    /// Create a new client-not-found error
    pub fn client_not_found<S: Into<String>>(id: S) -> Self {
        Error::ClientNotFound(id.into())
    }

    /// Create a new auth-failed error
    pub fn auth_failed<S: Into<String>>(msg: S) -> Self {
        Error::AuthFailed(msg.into())
    }

    /// Create a new recording error
    pub fn recording<S: Into<String>>(msg: S) -> Self {
        Error::Recording(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// The CDP JSON-RPC error code this error should be reported under when
    /// surfaced to a client as a command response error.
    pub fn cdp_code(&self) -> i32 {
        match self {
            Error::ExtensionUnavailable | Error::ExtensionReplaced | Error::Timeout(_) => -32000,
            Error::SessionNotFound(_) | Error::TargetNotFound(_) => -32001,
            _ => -32603,
        }
    }

    /// Render this error as a CDP `error` object suitable for embedding in
    /// a command response envelope (`{"id": ..., "error": <this>}`).
    pub fn to_cdp_error(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.cdp_code(),
            "message": self.to_string(),
        })
    }
}
