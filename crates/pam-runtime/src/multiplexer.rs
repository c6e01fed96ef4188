//! Session multiplexer
//!
//! Accepts sessions from the transport, runs one reader task per session and
//! fans every session's messages into a single [`MessageStream`].
//!
//! Ordering holds per session only; messages of different sessions
//! interleave in whatever order their readers run.
//!
//! A failing accept loop is fatal: the stream reports it on the next call to
//! [`MessageStream::next`] and tears itself down. A failing session only ends
//! its own reader.

use core::future::Future;
use core::time::Duration;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use pam_core::observer::tracing_observer;
use pam_core::{
    Failure, FailureSite, Payload, RuntimeConfig, Session, SharedObserver, Transport,
    TransportError, TransportResult,
};

use crate::errors::{RuntimeError, RuntimeResult};

type HookFn = Arc<dyn Fn(Session) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
/// Live readers keyed by accept order; transports may reuse session ids
type Readers = Arc<DashMap<u64, JoinHandle<()>>>;

// ----------------------------------------------------------------------------
// Session Hooks
// ----------------------------------------------------------------------------

pub(crate) fn wrap_hook<F, Fut>(hook: F) -> HookFn
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |session| hook(session).boxed())
}

/// Hooks run by every reader when its session starts and when it finishes
#[derive(Clone, Default)]
pub struct SessionHooks {
    pub(crate) connect: Option<HookFn>,
    pub(crate) disconnect: Option<HookFn>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run before the session is entered
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.connect = Some(wrap_hook(hook));
        self
    }

    /// Run after the session's messages are exhausted or the reader is told to stop
    pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.disconnect = Some(wrap_hook(hook));
        self
    }
}

async fn run_hook(
    hook: &Option<HookFn>,
    site: FailureSite,
    session: &Session,
    observer: &SharedObserver,
) {
    let Some(hook) = hook else {
        return;
    };
    match AssertUnwindSafe(hook(session.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => observer.observe(Failure::new(site, Some(session.id()), format!("{:#}", err))),
        Err(panic) => observer.observe(Failure::from_panic(site, Some(session.id()), panic.as_ref())),
    }
}

// ----------------------------------------------------------------------------
// Multiplexer
// ----------------------------------------------------------------------------

/// Accepts sessions and merges their messages
#[derive(Clone)]
pub struct Multiplexer {
    transport: Arc<dyn Transport>,
    hooks: SessionHooks,
    observer: SharedObserver,
    config: RuntimeConfig,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            hooks: SessionHooks::default(),
            observer: tracing_observer(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: SessionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept one session from the transport
    pub async fn accept(&self) -> TransportResult<Session> {
        let accepted = self.transport.accept_session().await?;
        Ok(Session::with_options(
            accepted,
            self.observer.clone(),
            &self.config,
        ))
    }

    /// Accepted sessions until the transport fails
    ///
    /// The failure is the last item of the stream.
    pub fn accept_loop(&self) -> BoxStream<'static, TransportResult<Session>> {
        stream::unfold(Some(self.clone()), |state| async move {
            let mux = state?;
            match mux.accept().await {
                Ok(session) => Some((Ok(session), Some(mux))),
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    /// Start accepting and return the merged stream of messages
    pub fn multiplex(&self) -> MessageStream {
        let (fan_in, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let readers: Readers = Arc::new(DashMap::new());

        let accept_task = tokio::spawn(accept_task(
            self.clone(),
            fan_in,
            readers.clone(),
            shutdown.subscribe(),
        ));

        MessageStream {
            rx,
            accept_task: Some(accept_task),
            readers,
            shutdown,
            grace: self.config.shutdown_grace,
            observer: self.observer.clone(),
            draining: Vec::new(),
            closed: false,
        }
    }
}

async fn accept_task(
    mux: Multiplexer,
    fan_in: mpsc::UnboundedSender<(Session, Payload)>,
    readers: Readers,
    shutdown: watch::Receiver<bool>,
) -> TransportResult<()> {
    info!("accept loop started");
    let mut sessions = mux.accept_loop();
    let mut accepted_count: u64 = 0;

    while let Some(accepted) = sessions.next().await {
        let session = match accepted {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "accept loop failed");
                return Err(err);
            }
        };

        let id = session.id();
        let key = accepted_count;
        accepted_count += 1;

        let reader = run_reader(
            session,
            key,
            fan_in.clone(),
            mux.hooks.clone(),
            mux.observer.clone(),
            shutdown.clone(),
            readers.clone(),
        );
        // Held under the shard lock so a reader finishing at once cannot
        // remove itself before it is inserted
        readers.entry(key).or_insert_with(|| tokio::spawn(reader));
        debug!(session = %id, reader = key, "reader spawned");
    }

    Ok(())
}

/// Removes the reader from the live set however the task ends
struct LiveReader {
    key: u64,
    readers: Readers,
}

impl Drop for LiveReader {
    fn drop(&mut self) {
        self.readers.remove(&self.key);
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_reader(
    session: Session,
    key: u64,
    fan_in: mpsc::UnboundedSender<(Session, Payload)>,
    hooks: SessionHooks,
    observer: SharedObserver,
    mut shutdown: watch::Receiver<bool>,
    readers: Readers,
) {
    let id = session.id();
    let _live = LiveReader { key, readers };

    run_hook(&hooks.connect, FailureSite::ConnectHook, &session, &observer).await;

    match session.enter() {
        Ok(()) => loop {
            let next = tokio::select! {
                biased;
                _ = wait_shutdown(&mut shutdown) => None,
                next = session.next() => next,
            };
            let Some(message) = next else {
                break;
            };
            if fan_in.send((session.clone(), message)).is_err() {
                break;
            }
        },
        Err(err) => warn!(session = %id, error = %err, "reader could not enter session"),
    }

    session.exit().await;
    run_hook(&hooks.disconnect, FailureSite::DisconnectHook, &session, &observer).await;
    debug!(session = %id, "reader finished");
}

// ----------------------------------------------------------------------------
// Message Stream
// ----------------------------------------------------------------------------

/// Summary of a stream teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Readers still live when teardown began
    pub readers: usize,
    /// Readers aborted because they outlived the shutdown grace
    pub aborted: usize,
    /// Readers that panicked
    pub failed: usize,
}

/// Merged `(session, message)` stream of a running multiplexer
///
/// [`close`](Self::close) stops the accept loop and every reader and waits
/// for them. Dropping the stream, or dropping a `close` before it finishes,
/// aborts whatever is still running.
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<(Session, Payload)>,
    accept_task: Option<JoinHandle<TransportResult<()>>>,
    readers: Readers,
    shutdown: watch::Sender<bool>,
    grace: Duration,
    observer: SharedObserver,
    /// Readers taken by a `close` that has not finished joining them
    draining: Vec<AbortHandle>,
    closed: bool,
}

enum Next {
    Message(Option<(Session, Payload)>),
    AcceptFinished(Result<TransportResult<()>, tokio::task::JoinError>),
}

impl MessageStream {
    /// Next message from any session
    ///
    /// `Ok(None)` once the stream is closed or every source is exhausted. A
    /// failed accept loop is returned as an error, after which the stream is
    /// closed.
    pub async fn next(&mut self) -> RuntimeResult<Option<(Session, Payload)>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            let next = match self.accept_task.as_mut() {
                Some(accept) => tokio::select! {
                    biased;
                    finished = accept => Next::AcceptFinished(finished),
                    message = self.rx.recv() => Next::Message(message),
                },
                None => Next::Message(self.rx.recv().await),
            };

            match next {
                Next::Message(Some(item)) => return Ok(Some(item)),
                Next::Message(None) => {
                    self.close().await;
                    return Ok(None);
                }
                Next::AcceptFinished(finished) => {
                    self.accept_task = None;
                    let err = match finished {
                        Ok(Ok(())) => continue,
                        Ok(Err(err)) => RuntimeError::AcceptLoop(err),
                        Err(join) if join.is_panic() => RuntimeError::AcceptLoopPanicked,
                        Err(_) => RuntimeError::AcceptLoop(TransportError::Shutdown {
                            reason: "accept loop cancelled".to_string(),
                        }),
                    };
                    self.close().await;
                    return Err(err);
                }
            }
        }
    }

    /// Number of readers currently running
    pub fn live_readers(&self) -> usize {
        self.readers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn take_readers(&self) -> Vec<JoinHandle<()>> {
        let keys: Vec<u64> = self.readers.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.readers.remove(&key).map(|(_, handle)| handle))
            .collect()
    }

    /// Stop accepting, stop every reader and wait for all of them
    ///
    /// Readers get the shutdown grace to exit their sessions and run their
    /// disconnect hooks; the rest are aborted. Idempotent, and safe to cancel:
    /// readers of a cancelled `close` are aborted by the next `close` or by
    /// dropping the stream.
    pub async fn close(&mut self) -> TeardownReport {
        if self.closed {
            return TeardownReport::default();
        }

        if let Some(accept) = self.accept_task.as_mut() {
            accept.abort();
            let finished = accept.await;
            self.accept_task = None;
            if matches!(&finished, Err(err) if err.is_panic()) {
                warn!("accept loop panicked during teardown");
            }
        }

        // Left over from a cancelled close; their join handles are gone
        let orphaned = core::mem::take(&mut self.draining);
        for abort in &orphaned {
            abort.abort();
        }

        let handles = self.take_readers();
        let mut report = TeardownReport {
            readers: handles.len() + orphaned.len(),
            aborted: orphaned.len(),
            ..TeardownReport::default()
        };
        self.draining = handles.iter().map(JoinHandle::abort_handle).collect();
        self.shutdown.send_replace(true);

        let joined = join_all(handles);
        tokio::pin!(joined);
        let results = match tokio::time::timeout(self.grace, joined.as_mut()).await {
            Ok(results) => results,
            Err(_) => {
                for abort in &self.draining {
                    abort.abort();
                }
                joined.await
            }
        };
        self.draining.clear();
        self.closed = true;

        for result in results {
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => report.aborted += 1,
                Err(err) => {
                    report.failed += 1;
                    self.observer
                        .observe(Failure::new(FailureSite::Reader, None, err));
                }
            }
        }

        self.rx.close();
        info!(
            readers = report.readers,
            aborted = report.aborted,
            failed = report.failed,
            "multiplexer closed"
        );
        report
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if let Some(accept) = self.accept_task.take() {
            accept.abort();
        }
        self.shutdown.send_replace(true);

        let mut aborted = 0;
        for handle in self.take_readers() {
            handle.abort();
            aborted += 1;
        }
        for abort in self.draining.drain(..) {
            abort.abort();
            aborted += 1;
        }
        if aborted > 0 {
            debug!(aborted, "message stream dropped before teardown finished, tasks aborted");
        }
    }
}
