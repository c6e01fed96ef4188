//! Test harness for Pattern Agentic Messaging
//!
//! An in-memory transport with fault injection and call accounting, and a
//! failure observer that records instead of logging.

pub mod memory;
pub mod observer;

pub use memory::{spawn_echo, MemorySession, MemoryTransport, RemotePeer, TransportStats};
pub use observer::RecordingObserver;
