//! Failure observation
//!
//! Callbacks, hooks and handlers are user code. Their failures never stop a
//! receive loop, a reader or the dispatch loop; they are reported here
//! instead.

use core::fmt;
use std::sync::Arc;
use tracing::{error, warn};

use crate::types::SessionId;

/// Where a suppressed failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureSite {
    /// A session callback
    Callback,
    /// The multiplexer connect hook
    ConnectHook,
    /// The multiplexer disconnect hook
    DisconnectHook,
    /// A dispatch handler
    Handler,
    /// A reader task that did not finish cleanly
    Reader,
}

impl fmt::Display for FailureSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureSite::Callback => "callback",
            FailureSite::ConnectHook => "connect hook",
            FailureSite::DisconnectHook => "disconnect hook",
            FailureSite::Handler => "handler",
            FailureSite::Reader => "reader",
        };
        f.write_str(name)
    }
}

/// A suppressed failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub site: FailureSite,
    pub session_id: Option<SessionId>,
    pub error: String,
}

impl Failure {
    pub fn new(site: FailureSite, session_id: Option<SessionId>, error: impl fmt::Display) -> Self {
        Self {
            site,
            session_id,
            error: error.to_string(),
        }
    }

    /// Failure from a panic payload caught with `catch_unwind`
    pub fn from_panic(
        site: FailureSite,
        session_id: Option<SessionId>,
        panic: &(dyn std::any::Any + Send),
    ) -> Self {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::new(site, session_id, format!("panicked: {}", message))
    }
}

/// Receiver of suppressed failures
pub trait FailureObserver: Send + Sync {
    fn observe(&self, failure: Failure);
}

pub type SharedObserver = Arc<dyn FailureObserver>;

/// Logs failures through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FailureObserver for TracingObserver {
    fn observe(&self, failure: Failure) {
        let session = failure
            .session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        match failure.site {
            FailureSite::Handler | FailureSite::Reader => {
                error!(session = %session, site = %failure.site, "{}", failure.error)
            }
            _ => warn!(session = %session, site = %failure.site, "{}", failure.error),
        }
    }
}

/// Default observer used when none is injected
pub fn tracing_observer() -> SharedObserver {
    Arc::new(TracingObserver)
}
