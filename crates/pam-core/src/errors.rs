//! Error types for Pattern Agentic Messaging
//!
//! This module contains the error types used throughout the core: codec errors,
//! session errors, transport errors, configuration errors, and the `PamError`
//! type that unifies them all.

use crate::types::SessionId;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Payload encoding errors
///
/// Decoding is total and never produces one of these; only encoding and the
/// construction of structured payloads can fail.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },
    #[error("Structured payload must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
}

/// Errors raised by session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {session_id} is closed")]
    Closed { session_id: SessionId },
    #[error("Session {session_id} ended by transport")]
    Ended { session_id: SessionId },
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },
    #[error("Message is not a request: missing `_request_id`")]
    NotARequest,
}

/// Opaque transport failures
///
/// The core never retries; a transport error on one session terminates only
/// that session's reader.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Session {session_id} ended: {reason}")]
    SessionEnded { session_id: SessionId, reason: String },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
    #[error("Accepting session failed: {reason}")]
    AcceptFailed { reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Operation not supported by transport: {operation}")]
    Unsupported { operation: &'static str },
    #[error("{0}")]
    Other(String),
}

/// Configuration, naming and authentication errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid name `{name}`: {expected}")]
    InvalidName { name: String, expected: &'static str },
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },
}

// ----------------------------------------------------------------------------
// Umbrella Error
// ----------------------------------------------------------------------------

/// Core error type for Pattern Agentic Messaging
#[derive(Debug, thiserror::Error)]
pub enum PamError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl PamError {
    /// Create a serialization error with a reason
    pub fn serialization<T: Into<String>>(reason: T) -> Self {
        PamError::Codec(CodecError::Serialization {
            reason: reason.into(),
        })
    }

    /// Create a session closed error
    pub fn session_closed(session_id: SessionId) -> Self {
        PamError::Session(SessionError::Closed { session_id })
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        PamError::Config(ConfigError::Invalid {
            reason: reason.into(),
        })
    }

    /// Create an authentication error with a reason
    pub fn authentication<T: Into<String>>(reason: T) -> Self {
        PamError::Config(ConfigError::Authentication {
            reason: reason.into(),
        })
    }

    /// True for the terminal "session is gone" errors
    pub fn is_session_closed(&self) -> bool {
        matches!(
            self,
            PamError::Session(SessionError::Closed { .. } | SessionError::Ended { .. })
        )
    }

    /// True when a request timed out waiting for its reply
    pub fn is_timeout(&self) -> bool {
        matches!(self, PamError::Session(SessionError::Timeout { .. }))
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PamError {
    fn from(err: serde_json::Error) -> Self {
        PamError::Codec(err.into())
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type PamResult<T> = core::result::Result<T, PamError>;
pub type TransportResult<T> = core::result::Result<T, TransportError>;
