//! Session: one transport session with a receive loop
//!
//! A `Session` owns a transport session exclusively. Entering it starts a
//! background receive loop that decodes every frame and then does one of
//! two things:
//!
//! - resolves a pending request when the frame is a structured reply whose
//!   `_request_id` has a registered waiter; the reply goes nowhere else
//! - otherwise runs every registered callback in registration order and
//!   queues `(context, payload)` on the inbound queue
//!
//! State moves `Created -> Active -> Closed`, or `Active -> Ended` when the
//! transport ends the session first. Closing is final. Once closed, `send`
//! fails, iteration yields nothing, and every outstanding request fails.
//! When the transport ends a session, the messages already queued can still
//! be consumed before iteration finishes.
//!
//! Callbacks run on the receive loop. A slow callback delays the callbacks
//! after it and delivery to whoever iterates the session.

use core::fmt;
use core::future::Future;
use core::time::Duration;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{saturating_millis, RuntimeConfig};
use crate::envelope;
use crate::errors::{PamResult, SessionError, TransportError};
use crate::observer::{tracing_observer, Failure, FailureSite, SharedObserver};
use crate::payload::{self, Payload, StructuredMap};
use crate::transport::BoxedSession;
use crate::types::{MessageContext, Name, SessionId, SessionKind};

/// Error a callback may return
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type CallbackFuture = BoxFuture<'static, Result<(), CallbackError>>;
type Callback = Arc<dyn Fn(Payload) -> CallbackFuture + Send + Sync>;
type Inbound = (MessageContext, Payload);

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Wrapped, receive loop not started
    Created,
    /// Receive loop running
    Active,
    /// The transport ended the session
    Ended,
    /// Closed locally
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the session handle and its receive loop
struct Shared {
    id: SessionId,
    kind: SessionKind,
    transport: BoxedSession,
    state: watch::Sender<SessionState>,
    callbacks: RwLock<Vec<Callback>>,
    pending: Mutex<HashMap<String, oneshot::Sender<StructuredMap>>>,
    observer: SharedObserver,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Drop every waiter; their requests wake up with a terminal error
    fn fail_pending(&self) -> usize {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        drained.len()
    }

    /// Consume the payload if it answers a pending request
    fn resolve_reply(&self, payload: Payload) -> Option<Payload> {
        let map = match payload {
            Payload::Structured(map) => map,
            other => return Some(other),
        };
        let waiter = envelope::request_id(&map).and_then(|id| lock(&self.pending).remove(id));
        match waiter {
            Some(waiter) => {
                if waiter.send(map).is_err() {
                    debug!(session = %self.id, "reply arrived after its request gave up");
                }
                None
            }
            None => Some(Payload::Structured(map)),
        }
    }

    async fn run_callbacks(&self, payload: &Payload) {
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in callbacks {
            let outcome = AssertUnwindSafe(callback(payload.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.observer.observe(Failure::new(
                    FailureSite::Callback,
                    Some(self.id),
                    err,
                )),
                Err(panic) => self.observer.observe(Failure::from_panic(
                    FailureSite::Callback,
                    Some(self.id),
                    panic.as_ref(),
                )),
            }
        }
    }

    /// The transport ended the session underneath us
    fn end(&self, err: &TransportError) {
        let ended = self.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Ended;
                true
            } else {
                false
            }
        });
        if ended {
            warn!(session = %self.id, error = %err, "session ended by transport");
        }
        let failed = self.fail_pending();
        if failed > 0 {
            debug!(session = %self.id, failed, "released pending requests");
        }
    }
}

async fn wait_closed(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(SessionState::is_closed).await;
}

async fn receive_loop(shared: Arc<Shared>, inbox: mpsc::UnboundedSender<Inbound>) {
    let mut state = shared.state.subscribe();
    debug!(session = %shared.id, "receive loop started");

    loop {
        let received = tokio::select! {
            biased;
            _ = wait_closed(&mut state) => break,
            received = shared.transport.receive() => received,
        };

        let (context, data) = match received {
            Ok(frame) => frame,
            Err(err) => {
                shared.end(&err);
                break;
            }
        };

        let Some(payload) = shared.resolve_reply(payload::decode(data)) else {
            continue;
        };

        shared.run_callbacks(&payload).await;

        if shared.state().is_closed() || inbox.send((context, payload)).is_err() {
            break;
        }
    }

    debug!(session = %shared.id, "receive loop finished");
}

/// Removes a waiter from the correlation table on every exit path
struct WaiterGuard<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<StructuredMap>>>,
    request_id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(self.request_id);
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

struct Inner {
    inbox_tx: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
    inbox_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    task: Mutex<Option<JoinHandle<()>>>,
    default_timeout: Option<Duration>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

/// Handle to one transport session
///
/// Clones share the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    inner: Arc<Inner>,
}

impl Session {
    /// Wrap a transport session, logging suppressed failures via `tracing`
    pub fn new(transport: BoxedSession) -> Self {
        Self::with_options(transport, tracing_observer(), &RuntimeConfig::default())
    }

    pub fn with_options(
        transport: BoxedSession,
        observer: SharedObserver,
        config: &RuntimeConfig,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Created);
        let shared = Shared {
            id: transport.id(),
            kind: transport.kind(),
            transport,
            state,
            callbacks: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            observer,
        };
        Self {
            shared: Arc::new(shared),
            inner: Arc::new(Inner {
                inbox_tx: Mutex::new(Some(inbox_tx)),
                inbox_rx: tokio::sync::Mutex::new(inbox_rx),
                task: Mutex::new(None),
                default_timeout: config.default_request_timeout,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn kind(&self) -> SessionKind {
        self.shared.kind
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Number of requests currently waiting for a reply
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start the receive loop
    ///
    /// Entering an active or ended session does nothing; entering a closed
    /// one fails.
    pub fn enter(&self) -> Result<(), SessionError> {
        let mut task = lock(&self.inner.task);

        let mut closed = false;
        let started = self.shared.state.send_if_modified(|state| match *state {
            SessionState::Created => {
                *state = SessionState::Active;
                true
            }
            SessionState::Closed => {
                closed = true;
                false
            }
            SessionState::Active | SessionState::Ended => false,
        });

        if closed {
            return Err(SessionError::Closed {
                session_id: self.id(),
            });
        }
        if !started {
            return Ok(());
        }

        if let Some(inbox) = lock(&self.inner.inbox_tx).take() {
            *task = Some(tokio::spawn(receive_loop(self.shared.clone(), inbox)));
        }
        debug!(session = %self.id(), kind = ?self.kind(), "session entered");
        Ok(())
    }

    /// Close the session and wait for the receive loop to stop
    ///
    /// Idempotent.
    pub async fn exit(&self) {
        if let Some(handle) = self.close_now() {
            match handle.await {
                Err(err) if err.is_panic() => {
                    warn!(session = %self.id(), "receive loop panicked");
                }
                _ => {}
            }
        }
    }

    /// Mark closed, release waiters and abort the loop without waiting for it
    fn close_now(&self) -> Option<JoinHandle<()>> {
        let previous = self.shared.state.send_replace(SessionState::Closed);
        let failed = self.shared.fail_pending();
        let handle = lock(&self.inner.task).take();
        if let Some(handle) = &handle {
            handle.abort();
        }
        if previous != SessionState::Closed {
            info!(session = %self.id(), previous = %previous, failed, "session closed");
        }
        handle
    }

    /// Run `f` inside the session's lifecycle
    ///
    /// The session is closed when `f` returns, panics, or the returned future
    /// is dropped.
    pub async fn scoped<F, Fut, R>(&self, f: F) -> PamResult<R>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = R>,
    {
        self.enter()?;
        let mut guard = CloseOnDrop(Some(self.clone()));
        let outcome = AssertUnwindSafe(f(self.clone())).catch_unwind().await;
        guard.0 = None;
        self.exit().await;
        match outcome {
            Ok(result) => Ok(result),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Register a callback run for every non-reply message
    pub fn register_callback<F, Fut, E>(&self, callback: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<CallbackError>,
    {
        let callback: Callback = Arc::new(move |payload| {
            let fut = callback(payload);
            async move { fut.await.map_err(Into::into) }.boxed()
        });
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Next queued message with its transport context
    ///
    /// Returns `None` once the session is closed, or once an ended session
    /// has been drained.
    pub async fn next_with_context(&self) -> Option<(MessageContext, Payload)> {
        let mut state = self.shared.state.subscribe();
        let mut inbox = self.inner.inbox_rx.lock().await;
        tokio::select! {
            biased;
            _ = wait_closed(&mut state) => None,
            item = inbox.recv() => item,
        }
    }

    pub async fn next(&self) -> Option<Payload> {
        self.next_with_context().await.map(|(_, payload)| payload)
    }

    /// Queued messages as a stream, finite once the session closes
    pub fn messages(&self) -> BoxStream<'static, Payload> {
        stream::unfold(self.clone(), |session| async move {
            let payload = session.next().await?;
            Some((payload, session))
        })
        .boxed()
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    fn ensure_not_closed(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed {
                session_id: self.id(),
            });
        }
        Ok(())
    }

    fn terminal_error(&self) -> SessionError {
        let session_id = self.id();
        match self.state() {
            SessionState::Closed => SessionError::Closed { session_id },
            _ => SessionError::Ended { session_id },
        }
    }

    /// Encode and send a payload
    pub async fn send(&self, payload: impl Into<Payload>) -> PamResult<()> {
        self.ensure_not_closed()?;
        let data = payload.into().encode()?;
        self.shared.transport.send(data).await?;
        Ok(())
    }

    /// Send a request and wait for the reply carrying the same request id
    ///
    /// Without an explicit timeout the runtime default applies; with neither
    /// the call waits until a reply arrives or the session goes away.
    pub async fn request(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
    ) -> PamResult<StructuredMap> {
        let request_id = envelope::new_request_id();
        let message = envelope::tag(payload.into(), &request_id)?;

        let (waiter, reply) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id.clone(), waiter);
        let _guard = WaiterGuard {
            pending: &self.shared.pending,
            request_id: &request_id,
        };

        // Checked after registering so a concurrent close cannot strand the waiter
        if matches!(self.state(), SessionState::Closed | SessionState::Ended) {
            return Err(self.terminal_error().into());
        }

        self.send(Payload::Structured(message)).await?;
        debug!(session = %self.id(), request_id = %request_id, "request sent");

        let received = match timeout.or(self.inner.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(SessionError::Timeout {
                        request_id: request_id.clone(),
                        timeout_ms: saturating_millis(limit),
                    }
                    .into())
                }
            },
            None => reply.await,
        };

        received.map_err(|_| self.terminal_error().into())
    }

    /// Answer a received request
    pub async fn reply(&self, request: &StructuredMap, payload: impl Into<Payload>) -> PamResult<()> {
        if envelope::request_id(request).is_none() {
            return Err(SessionError::NotARequest.into());
        }
        let message = envelope::reply_to(request, payload.into())?;
        self.send(Payload::Structured(message)).await
    }

    // ------------------------------------------------------------------------
    // Group Membership
    // ------------------------------------------------------------------------

    pub async fn invite(&self, name: &str) -> PamResult<()> {
        self.ensure_not_closed()?;
        let name = Name::parse_remote(name)?;
        self.shared.transport.invite(&name).await?;
        info!(session = %self.id(), participant = %name, "participant invited");
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> PamResult<()> {
        self.ensure_not_closed()?;
        let name = Name::parse_remote(name)?;
        self.shared.transport.remove(&name).await?;
        info!(session = %self.id(), participant = %name, "participant removed");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

struct CloseOnDrop(Option<Session>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            session.close_now();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
