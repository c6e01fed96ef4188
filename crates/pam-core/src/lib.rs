//! Pattern Agentic Messaging Core
//!
//! This crate provides the payload codec, the request/reply envelope, the
//! transport boundary traits and the `Session` type that drains one transport
//! session, runs callbacks and correlates requests with their replies.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod auth;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod observer;
pub mod payload;
pub mod session;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use auth::{create_jwt_auth, create_shared_secret_auth, IdentityProvider, IdentityVerifier, PublicKey};
pub use config::{AppConfig, BaseConfig, GroupConfig, P2pConfig, RuntimeConfig, SessionConfig};
pub use errors::{
    CodecError, ConfigError, PamError, PamResult, SessionError, TransportError, TransportResult,
};
pub use observer::{Failure, FailureObserver, FailureSite, SharedObserver, TracingObserver};
pub use payload::{decode, encode, Payload, StructuredMap};
pub use session::{CallbackError, Session, SessionState};
pub use transport::{BoxedSession, ConnectParams, Transport, TransportSession};
pub use types::{GroupMode, MessageContext, Name, SessionId, SessionKind, SessionMode};
