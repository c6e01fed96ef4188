//! Runtime error types

use pam_core::{ConfigError, PamError, SessionError, TransportError};

/// Errors surfaced by the multiplexer and the application facade
///
/// Handler, callback and hook failures never show up here; they go to the
/// failure observer.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] PamError),

    #[error("Accept loop failed: {0}")]
    AcceptLoop(#[source] TransportError),

    #[error("Accept loop panicked")]
    AcceptLoopPanicked,

    #[error("No message handlers registered")]
    NoHandlers,

    #[error("Application already started")]
    AlreadyStarted,

    #[error("Application not started")]
    NotStarted,
}

impl RuntimeError {
    /// True for failures of the accept loop, which end the whole stream
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::AcceptLoop(_) | RuntimeError::AcceptLoopPanicked
        )
    }
}

impl From<TransportError> for RuntimeError {
    fn from(err: TransportError) -> Self {
        RuntimeError::Core(err.into())
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(err: ConfigError) -> Self {
        RuntimeError::Core(err.into())
    }
}

impl From<SessionError> for RuntimeError {
    fn from(err: SessionError) -> Self {
        RuntimeError::Core(err.into())
    }
}

pub type RuntimeResult<T> = core::result::Result<T, RuntimeError>;
