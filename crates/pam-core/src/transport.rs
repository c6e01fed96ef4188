//! Transport abstraction
//!
//! The messaging transport is an external collaborator. The core only needs
//! to accept or create sessions and to move byte frames over them; naming,
//! routing, encryption and retries all live behind these traits.

use async_trait::async_trait;

use crate::auth::{IdentityProvider, IdentityVerifier};
use crate::config::SessionConfig;
use crate::errors::{TransportError, TransportResult};
use crate::types::{MessageContext, Name, SessionId, SessionKind};

/// Boxed transport session as handed out by a [`Transport`]
pub type BoxedSession = Box<dyn TransportSession>;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Parameters for establishing the local endpoint
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub local_name: Name,
    pub endpoint: String,
    pub provider: IdentityProvider,
    pub verifier: IdentityVerifier,
}

/// Messaging transport providing sessions
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the local endpoint
    async fn connect(&self, _params: &ConnectParams) -> TransportResult<()> {
        Ok(())
    }

    /// Wait for the next inbound session
    ///
    /// An error here is fatal to whoever is accepting.
    async fn accept_session(&self) -> TransportResult<BoxedSession>;

    /// Create a session towards a peer or a group channel
    async fn create_session(&self, config: &SessionConfig) -> TransportResult<BoxedSession>;

    /// Make a remote name reachable before creating a session or inviting it
    async fn set_route(&self, name: &Name) -> TransportResult<()>;
}

// ----------------------------------------------------------------------------
// Transport Session Trait
// ----------------------------------------------------------------------------

/// One bidirectional, ordered stream of byte frames
///
/// `receive` and `send` may be called concurrently from different tasks.
#[async_trait]
pub trait TransportSession: Send + Sync + 'static {
    fn id(&self) -> SessionId;

    fn kind(&self) -> SessionKind;

    /// Wait for the next frame; fails once the session has ended
    async fn receive(&self) -> TransportResult<(MessageContext, Vec<u8>)>;

    /// Send one frame; no retry
    async fn send(&self, data: Vec<u8>) -> TransportResult<()>;

    /// Invite a participant into a group session
    async fn invite(&self, _name: &Name) -> TransportResult<()> {
        Err(TransportError::Unsupported {
            operation: "invite",
        })
    }

    /// Remove a participant from a group session
    async fn remove(&self, _name: &Name) -> TransportResult<()> {
        Err(TransportError::Unsupported {
            operation: "remove",
        })
    }
}
