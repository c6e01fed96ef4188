//! Message dispatch
//!
//! Routes each `(session, message)` pair to one handler. Filtered handlers
//! are tried in registration order and the first match wins. When none
//! matches, the first registered catch-all runs; later catch-alls are never
//! used. With no catch-all the message is logged and dropped.

use core::fmt;
use core::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use pam_core::{Failure, FailureSite, Payload, Session, SharedObserver};

// ----------------------------------------------------------------------------
// Message Handler Trait
// ----------------------------------------------------------------------------

/// Handles one message received on a session
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session: Session, message: Payload) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, session: Session, message: Payload) -> anyhow::Result<()> {
        self(session, message).await
    }
}

// ----------------------------------------------------------------------------
// Filters
// ----------------------------------------------------------------------------

type Predicate = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Selects the messages a handler accepts
#[derive(Clone)]
pub enum Filter {
    /// Structured messages whose `key` equals `value`; a missing key reads as `null`
    Field { key: String, value: Value },
    /// Any message the predicate accepts
    Predicate(Predicate),
}

impl Filter {
    pub fn field(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Field {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn predicate<P>(predicate: P) -> Self
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, message: &Payload) -> bool {
        match self {
            Filter::Field { key, value } => message
                .as_structured()
                .is_some_and(|map| map.get(key).unwrap_or(&Value::Null) == value),
            Filter::Predicate(predicate) => predicate(message),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Field { key, value } => write!(f, "{} == {}", key, value),
            Filter::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}

// ----------------------------------------------------------------------------
// Handler Registry
// ----------------------------------------------------------------------------

#[derive(Clone)]
struct Registration {
    filter: Option<Filter>,
    handler: Arc<dyn MessageHandler>,
}

/// Which registration a message is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Index of the matching filtered registration
    Filtered(usize),
    /// Index of the catch-all registration
    CatchAll(usize),
    Unhandled,
}

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// The handler returned an error or panicked
    Failed,
    Unhandled,
}

/// Ordered list of handler registrations
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Register any [`MessageHandler`]; `None` makes it a catch-all
    pub fn register<H: MessageHandler + 'static>(
        &mut self,
        filter: Option<Filter>,
        handler: H,
    ) -> &mut Self {
        self.registrations.push(Registration {
            filter,
            handler: Arc::new(handler),
        });
        self
    }

    /// Register a catch-all handler
    pub fn on_message<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(None, handler)
    }

    /// Register a handler for structured messages where `key == value`
    pub fn on_message_where<F, Fut>(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Some(Filter::field(key, value)), handler)
    }

    /// Register a handler for messages accepted by `predicate`
    pub fn on_message_matching<P, F, Fut>(&mut self, predicate: P, handler: F) -> &mut Self
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Some(Filter::predicate(predicate)), handler)
    }

    pub fn route(&self, message: &Payload) -> Route {
        let filtered = self.registrations.iter().position(|registration| {
            registration
                .filter
                .as_ref()
                .is_some_and(|filter| filter.matches(message))
        });
        if let Some(index) = filtered {
            return Route::Filtered(index);
        }

        self.registrations
            .iter()
            .position(|registration| registration.filter.is_none())
            .map(Route::CatchAll)
            .unwrap_or(Route::Unhandled)
    }

    /// Run the handler selected for `message`
    ///
    /// Handler errors and panics are reported to `observer` and never
    /// propagate.
    pub async fn dispatch(
        &self,
        session: &Session,
        message: Payload,
        observer: &SharedObserver,
    ) -> DispatchOutcome {
        let index = match self.route(&message) {
            Route::Filtered(index) | Route::CatchAll(index) => index,
            Route::Unhandled => {
                warn!(session = %session.id(), kind = message.kind(), "no handler for message");
                return DispatchOutcome::Unhandled;
            }
        };

        let kind = message.kind();
        let handler = self.registrations[index].handler.clone();
        let outcome = AssertUnwindSafe(handler.handle(session.clone(), message))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return DispatchOutcome::Handled,
            Ok(Err(err)) => Failure::new(
                FailureSite::Handler,
                Some(session.id()),
                format!("{:#} (handler {}, {} message)", err, index, kind),
            ),
            Err(panic) => Failure::from_panic(FailureSite::Handler, Some(session.id()), panic.as_ref()),
        };
        observer.observe(failure);
        DispatchOutcome::Failed
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| &r.filter))
            .finish()
    }
}
