//! Application facade
//!
//! `App` ties configuration, a transport, handler registrations and session
//! hooks together. It starts the local endpoint, opens sessions the way the
//! configured mode requires, and runs the dispatch loop over the multiplexed
//! message stream until stopped.

use core::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use pam_core::observer::tracing_observer;
use pam_core::{
    create_shared_secret_auth, AppConfig, BaseConfig, ConnectParams, Name, Payload, RuntimeConfig,
    Session, SharedObserver, Transport, TransportResult,
};

use crate::dispatch::HandlerRegistry;
use crate::errors::{RuntimeError, RuntimeResult};
use crate::multiplexer::{wrap_hook, MessageStream, Multiplexer, SessionHooks};

// ----------------------------------------------------------------------------
// Stop Handle
// ----------------------------------------------------------------------------

/// Requests that a running [`App`] stop after its current message
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

async fn wait_stop(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

// ----------------------------------------------------------------------------
// App
// ----------------------------------------------------------------------------

/// Messaging application over a transport
pub struct App<T: Transport> {
    config: AppConfig,
    runtime: RuntimeConfig,
    transport: Arc<T>,
    registry: HandlerRegistry,
    hooks: SessionHooks,
    observer: SharedObserver,
    local_name: Option<Name>,
    stop: StopHandle,
}

impl<T: Transport> App<T> {
    pub fn new(config: impl Into<AppConfig>, transport: T) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config: config.into(),
            runtime: RuntimeConfig::default(),
            transport: Arc::new(transport),
            registry: HandlerRegistry::new(),
            hooks: SessionHooks::default(),
            observer: tracing_observer(),
            local_name: None,
            stop: StopHandle {
                stop: Arc::new(stop),
            },
        }
    }

    pub fn with_runtime_config(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn base(&self) -> &BaseConfig {
        self.config.base()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Local name, once started
    pub fn local_name(&self) -> Option<&Name> {
        self.local_name.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.local_name.is_some()
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register the catch-all handler
    ///
    /// Only the first catch-all registered is ever used.
    pub fn on_message<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on_message(handler);
        self
    }

    /// Register a handler for structured messages whose `discriminator` equals `value`
    pub fn on_message_where<F, Fut>(
        &mut self,
        discriminator: impl Into<String>,
        value: impl Into<Value>,
        handler: F,
    ) -> &mut Self
    where
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on_message_where(discriminator, value, handler);
        self
    }

    pub fn on_message_matching<P, F, Fut>(&mut self, predicate: P, handler: F) -> &mut Self
    where
        P: Fn(&Payload) -> bool + Send + Sync + 'static,
        F: Fn(Session, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.on_message_matching(predicate, handler);
        self
    }

    pub fn on_session_connect<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.connect = Some(wrap_hook(hook));
        self
    }

    pub fn on_session_disconnect<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.disconnect = Some(wrap_hook(hook));
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Validate the configuration and connect the local endpoint
    pub async fn start(&mut self) -> RuntimeResult<()> {
        if self.is_started() {
            return Err(RuntimeError::AlreadyStarted);
        }

        self.config.validate()?;
        let base = self.base();
        let secret = base.require_secret()?;
        let local_name = base.local_name()?;
        let (provider, verifier) = create_shared_secret_auth(local_name.to_string(), secret);

        let params = ConnectParams {
            local_name: local_name.clone(),
            endpoint: base.endpoint.clone(),
            provider,
            verifier,
        };
        self.transport.connect(&params).await?;

        info!(local = %local_name, endpoint = %params.endpoint, "application started");
        self.local_name = Some(local_name);
        Ok(())
    }

    fn ensure_started(&self) -> RuntimeResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(RuntimeError::NotStarted)
        }
    }

    fn multiplexer(&self) -> Multiplexer {
        let transport: Arc<dyn Transport> = self.transport.clone();
        Multiplexer::new(transport)
            .with_hooks(self.hooks.clone())
            .with_observer(self.observer.clone())
            .with_config(self.runtime.clone())
    }

    fn wrap(&self, session: pam_core::BoxedSession) -> Session {
        Session::with_options(session, self.observer.clone(), &self.runtime)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Ask a running dispatch loop to stop
    pub fn stop(&self) {
        info!("stop requested");
        self.stop.stop();
    }

    // ------------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------------

    /// Open a point-to-point session to `peer_name`
    pub async fn connect(&self, peer_name: &str) -> RuntimeResult<Session> {
        self.ensure_started()?;
        let peer = Name::parse_remote(peer_name)?;
        self.transport.set_route(&peer).await?;
        let config = self.base().point_to_point(peer.clone());
        let session = self.wrap(self.transport.create_session(&config).await?);
        info!(session = %session.id(), peer = %peer, "connected to peer");
        Ok(session)
    }

    /// Wait for one inbound session
    pub async fn accept(&self) -> RuntimeResult<Session> {
        self.ensure_started()?;
        let session = self.multiplexer().accept().await?;
        debug!(session = %session.id(), "session accepted");
        Ok(session)
    }

    /// Create a group channel and invite participants into it
    pub async fn create_channel<S: AsRef<str>>(
        &self,
        channel_name: &str,
        invites: &[S],
    ) -> RuntimeResult<Session> {
        self.ensure_started()?;
        let channel = Name::parse_remote(channel_name)?;
        let config = self.base().group(channel.clone());
        let session = self.wrap(self.transport.create_session(&config).await?);

        for invite in invites {
            let participant = Name::parse_remote(invite.as_ref())?;
            self.transport.set_route(&participant).await?;
            session.invite(invite.as_ref()).await?;
        }

        info!(
            session = %session.id(),
            channel = %channel,
            invited = invites.len(),
            "channel created"
        );
        Ok(session)
    }

    /// Wait to be invited into a group channel
    pub async fn join_channel(&self) -> RuntimeResult<Session> {
        self.accept().await
    }

    /// Stream of accepted sessions, ending after the first transport failure
    pub fn listen(&self) -> RuntimeResult<BoxStream<'static, TransportResult<Session>>> {
        self.ensure_started()?;
        Ok(self.multiplexer().accept_loop())
    }

    /// Multiplexed stream of messages from every accepted session
    pub fn messages(&self) -> RuntimeResult<MessageStream> {
        self.ensure_started()?;
        Ok(self.multiplexer().multiplex())
    }

    // ------------------------------------------------------------------------
    // Dispatch Loop
    // ------------------------------------------------------------------------

    /// Dispatch every multiplexed message until stopped or the stream ends
    ///
    /// Starts the application first if needed.
    pub async fn run(&mut self) -> RuntimeResult<()> {
        if self.registry.is_empty() {
            return Err(RuntimeError::NoHandlers);
        }
        if !self.is_started() {
            self.start().await?;
        }

        let mut stop = self.stop.stop.subscribe();
        let mut stream = self.messages()?;
        info!(handlers = self.registry.len(), "dispatch loop running");

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = wait_stop(&mut stop) => None,
                next = stream.next() => Some(next),
            };
            let Some(next) = next else {
                break Ok(());
            };
            match next {
                Ok(Some((session, message))) => {
                    self.registry.dispatch(&session, message, &self.observer).await;
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        stream.close().await;
        info!("dispatch loop stopped");
        result
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run_until_signal(&mut self) -> RuntimeResult<()> {
        let stop = self.stop_handle();
        let watcher = tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            stop.stop();
        });
        let result = self.run().await;
        watcher.abort();
        result
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
