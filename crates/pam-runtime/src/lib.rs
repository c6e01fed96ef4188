//! Pattern Agentic Messaging Runtime
//!
//! This crate contains the runtime on top of `pam-core`:
//! - `Multiplexer`: accepts sessions and merges their messages into one stream
//! - `HandlerRegistry`: routes each message to the first matching handler
//! - `App`: configuration, transport and handlers behind one facade

pub mod app;
pub mod dispatch;
pub mod errors;
pub mod multiplexer;

pub use app::{App, StopHandle};
pub use dispatch::{DispatchOutcome, Filter, HandlerRegistry, MessageHandler, Route};
pub use errors::{RuntimeError, RuntimeResult};
pub use multiplexer::{MessageStream, Multiplexer, SessionHooks, TeardownReport};

// Re-export core types for convenience
pub use pam_core::{
    AppConfig, BaseConfig, GroupConfig, P2pConfig, Payload, RuntimeConfig, Session, SessionId,
    StructuredMap,
};
