//! In-memory transport
//!
//! A deterministic transport for tests and demos. Every session is a pair of
//! unbounded channels: the local side is handed to the code under test as a
//! [`TransportSession`], the remote side is a [`RemotePeer`] the test drives
//! directly. Every transport call is counted, and calls still in flight are
//! tracked, so tests can assert that nothing touches the transport after
//! teardown.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use pam_core::envelope;
use pam_core::{
    BoxedSession, ConnectParams, MessageContext, Name, Payload, SessionConfig, SessionId,
    SessionKind, Transport, TransportError, TransportResult, TransportSession,
};

type Frame = (MessageContext, Vec<u8>);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    accept_calls: AtomicU64,
    receive_calls: AtomicU64,
    send_calls: AtomicU64,
    sessions_created: AtomicU64,
    routes_set: AtomicU64,
    accepts_in_flight: AtomicUsize,
    receives_in_flight: AtomicUsize,
}

/// Snapshot of transport call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connects: u64,
    pub accept_calls: u64,
    pub receive_calls: u64,
    pub send_calls: u64,
    pub sessions_created: u64,
    pub routes_set: u64,
    /// `accept_session` calls that have not returned
    pub accepts_in_flight: usize,
    /// `receive` calls that have not returned
    pub receives_in_flight: usize,
}

impl TransportStats {
    /// True when no transport call is currently pending
    pub fn is_idle(&self) -> bool {
        self.accepts_in_flight == 0 && self.receives_in_flight == 0
    }
}

/// Tracks one pending call; the count drops even if the call is cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Memory Transport
// ----------------------------------------------------------------------------

enum AcceptEvent {
    Session(MemorySession),
    Fail(String),
}

struct Network {
    next_id: AtomicU64,
    counters: Arc<Counters>,
    accept_tx: Mutex<Option<mpsc::UnboundedSender<AcceptEvent>>>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AcceptEvent>>,
    created_tx: mpsc::UnboundedSender<RemotePeer>,
    created_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemotePeer>>,
    connected: Mutex<Option<ConnectParams>>,
    routes: Mutex<Vec<Name>>,
    configs: Mutex<Vec<SessionConfig>>,
}

/// In-memory transport; clones share the same network
#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<Network>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (created_tx, created_rx) = mpsc::unbounded_channel();
        Self {
            network: Arc::new(Network {
                next_id: AtomicU64::new(1),
                counters: Arc::new(Counters::default()),
                accept_tx: Mutex::new(Some(accept_tx)),
                accept_rx: tokio::sync::Mutex::new(accept_rx),
                created_tx,
                created_rx: tokio::sync::Mutex::new(created_rx),
                connected: Mutex::new(None),
                routes: Mutex::new(Vec::new()),
                configs: Mutex::new(Vec::new()),
            }),
        }
    }

    fn pair(&self, kind: SessionKind, remote: &str) -> (MemorySession, RemotePeer) {
        let id = SessionId::new(self.network.next_id.fetch_add(1, Ordering::Relaxed));
        self.pair_with_id(id, kind, remote)
    }

    fn pair_with_id(
        &self,
        id: SessionId,
        kind: SessionKind,
        remote: &str,
    ) -> (MemorySession, RemotePeer) {
        let (to_local, inbound) = mpsc::unbounded_channel();
        let (outbound, from_local) = mpsc::unbounded_channel();
        let members = Arc::new(Mutex::new(Vec::new()));

        let session = MemorySession {
            id,
            kind,
            inbound: tokio::sync::Mutex::new(inbound),
            outbound,
            members: members.clone(),
            counters: self.network.counters.clone(),
        };
        let peer = RemotePeer {
            id,
            source: remote.to_string(),
            to_local: Arc::new(Mutex::new(Some(to_local))),
            from_local: Arc::new(tokio::sync::Mutex::new(from_local)),
            members,
        };
        (session, peer)
    }

    /// Queue an inbound session from `remote`; the next accept returns it
    pub fn open_session(&self, remote: &str) -> RemotePeer {
        self.open_with_kind(SessionKind::PointToPoint, remote)
    }

    /// Queue an inbound group session for a channel
    pub fn open_group(&self, channel: &str) -> RemotePeer {
        self.open_with_kind(SessionKind::Group, channel)
    }

    /// Queue an inbound session that reuses `id`, as some transports do
    pub fn open_session_with_id(&self, id: SessionId, remote: &str) -> RemotePeer {
        let (session, peer) = self.pair_with_id(id, SessionKind::PointToPoint, remote);
        self.queue(session, peer)
    }

    fn open_with_kind(&self, kind: SessionKind, remote: &str) -> RemotePeer {
        let (session, peer) = self.pair(kind, remote);
        self.queue(session, peer)
    }

    fn queue(&self, session: MemorySession, peer: RemotePeer) -> RemotePeer {
        let queued = lock(&self.network.accept_tx)
            .as_ref()
            .map(|tx| tx.send(AcceptEvent::Session(session)).is_ok())
            .unwrap_or(false);
        if !queued {
            debug!(session = %peer.id, "transport shut down, session not queued");
        }
        peer
    }

    /// Make the next accept fail with `reason`
    pub fn fail_accept(&self, reason: &str) {
        if let Some(tx) = lock(&self.network.accept_tx).as_ref() {
            let _ = tx.send(AcceptEvent::Fail(reason.to_string()));
        }
    }

    /// Stop handing out sessions; pending and later accepts fail
    pub fn shutdown(&self) {
        lock(&self.network.accept_tx).take();
    }

    /// Remote side of the next session created through `create_session`
    pub async fn next_created(&self) -> Option<RemotePeer> {
        self.network.created_rx.lock().await.recv().await
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.network.counters;
        TransportStats {
            connects: c.connects.load(Ordering::SeqCst),
            accept_calls: c.accept_calls.load(Ordering::SeqCst),
            receive_calls: c.receive_calls.load(Ordering::SeqCst),
            send_calls: c.send_calls.load(Ordering::SeqCst),
            sessions_created: c.sessions_created.load(Ordering::SeqCst),
            routes_set: c.routes_set.load(Ordering::SeqCst),
            accepts_in_flight: c.accepts_in_flight.load(Ordering::SeqCst),
            receives_in_flight: c.receives_in_flight.load(Ordering::SeqCst),
        }
    }

    /// Parameters of the last `connect` call
    pub fn connected(&self) -> Option<ConnectParams> {
        lock(&self.network.connected).clone()
    }

    /// Names passed to `set_route`, in call order
    pub fn routes(&self) -> Vec<Name> {
        lock(&self.network.routes).clone()
    }

    /// Configurations passed to `create_session`, in call order
    pub fn created_configs(&self) -> Vec<SessionConfig> {
        lock(&self.network.configs).clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, params: &ConnectParams) -> TransportResult<()> {
        self.network.counters.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.network.connected) = Some(params.clone());
        debug!(local = %params.local_name, endpoint = %params.endpoint, "memory transport connected");
        Ok(())
    }

    async fn accept_session(&self) -> TransportResult<BoxedSession> {
        let counters = &self.network.counters;
        counters.accept_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&counters.accepts_in_flight);

        match self.network.accept_rx.lock().await.recv().await {
            Some(AcceptEvent::Session(session)) => {
                debug!(session = %session.id, "session accepted");
                Ok(Box::new(session))
            }
            Some(AcceptEvent::Fail(reason)) => Err(TransportError::AcceptFailed { reason }),
            None => Err(TransportError::Shutdown {
                reason: "memory transport shut down".to_string(),
            }),
        }
    }

    async fn create_session(&self, config: &SessionConfig) -> TransportResult<BoxedSession> {
        let kind = match config {
            SessionConfig::PointToPoint { .. } => SessionKind::PointToPoint,
            SessionConfig::Group { .. } => SessionKind::Group,
        };
        let (session, peer) = self.pair(kind, &config.remote().to_string());
        self.network
            .counters
            .sessions_created
            .fetch_add(1, Ordering::SeqCst);
        lock(&self.network.configs).push(config.clone());
        let _ = self.network.created_tx.send(peer);
        Ok(Box::new(session))
    }

    async fn set_route(&self, name: &Name) -> TransportResult<()> {
        self.network.counters.routes_set.fetch_add(1, Ordering::SeqCst);
        lock(&self.network.routes).push(name.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Memory Session
// ----------------------------------------------------------------------------

/// Local side of an in-memory session
pub struct MemorySession {
    id: SessionId,
    kind: SessionKind,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    members: Arc<Mutex<Vec<Name>>>,
    counters: Arc<Counters>,
}

impl MemorySession {
    fn require_group(&self, operation: &'static str) -> TransportResult<()> {
        match self.kind {
            SessionKind::Group => Ok(()),
            SessionKind::PointToPoint => Err(TransportError::Unsupported { operation }),
        }
    }
}

#[async_trait]
impl TransportSession for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn kind(&self) -> SessionKind {
        self.kind
    }

    async fn receive(&self) -> TransportResult<(MessageContext, Vec<u8>)> {
        self.counters.receive_calls.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.counters.receives_in_flight);

        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::SessionEnded {
                session_id: self.id,
                reason: "remote peer ended the session".to_string(),
            })
    }

    async fn send(&self, data: Vec<u8>) -> TransportResult<()> {
        self.counters.send_calls.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .send(data)
            .map_err(|_| TransportError::SendFailed {
                reason: format!("session {} has no remote side", self.id),
            })
    }

    async fn invite(&self, name: &Name) -> TransportResult<()> {
        self.require_group("invite")?;
        let mut members = lock(&self.members);
        if !members.contains(name) {
            members.push(name.clone());
        }
        Ok(())
    }

    async fn remove(&self, name: &Name) -> TransportResult<()> {
        self.require_group("remove")?;
        lock(&self.members).retain(|member| member != name);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Remote Peer
// ----------------------------------------------------------------------------

/// Remote side of an in-memory session, driven by the test
#[derive(Clone)]
pub struct RemotePeer {
    id: SessionId,
    source: String,
    to_local: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>,
    from_local: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    members: Arc<Mutex<Vec<Name>>>,
}

impl RemotePeer {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Deliver a raw frame to the local side
    pub fn send_raw(&self, data: Vec<u8>) -> TransportResult<()> {
        let context = MessageContext::from_source(self.source.clone());
        match lock(&self.to_local).as_ref() {
            Some(tx) => tx.send((context, data)).map_err(|_| TransportError::SendFailed {
                reason: "local side dropped".to_string(),
            }),
            None => Err(TransportError::SessionEnded {
                session_id: self.id,
                reason: "remote peer already ended the session".to_string(),
            }),
        }
    }

    /// Encode and deliver a payload to the local side
    pub fn send(&self, payload: impl Into<Payload>) -> TransportResult<()> {
        let data = payload
            .into()
            .encode()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        self.send_raw(data)
    }

    /// Next frame sent by the local side
    pub async fn recv_raw(&self) -> Option<Vec<u8>> {
        self.from_local.lock().await.recv().await
    }

    /// Next payload sent by the local side
    pub async fn recv(&self) -> Option<Payload> {
        self.recv_raw().await.map(pam_core::decode)
    }

    /// End the session; the local receive fails once queued frames are read
    pub fn end(&self) {
        lock(&self.to_local).take();
    }

    /// Participants invited into this group session
    pub fn members(&self) -> Vec<Name> {
        lock(&self.members).clone()
    }
}

/// Answer every frame the local side sends on `peer`
///
/// Requests get a reply tagged with their id carrying the same body; other
/// payloads are sent back unchanged. Stops when the local side goes away.
pub fn spawn_echo(peer: RemotePeer) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = peer.recv().await {
            let answer = match payload.as_structured() {
                Some(map) if envelope::request_id(map).is_some() => {
                    let mut body = map.clone();
                    body.remove(envelope::REQUEST_ID_KEY);
                    match envelope::reply_to(map, Payload::Structured(body)) {
                        Ok(reply) => Payload::Structured(reply),
                        Err(_) => continue,
                    }
                }
                _ => payload,
            };
            if peer.send(answer).is_err() {
                break;
            }
        }
        debug!(session = %peer.id, "echo peer finished");
    })
}
