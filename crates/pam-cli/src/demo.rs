//! Loopback demo
//!
//! Exercises both directions of the runtime over the in-memory transport:
//! an outbound session issuing requests to an echo peer, and the dispatch
//! loop serving inbound clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use pam_core::envelope::REQUEST_ID_KEY;
use pam_core::{AppConfig, PamError, Payload};
use pam_harness::{spawn_echo, MemoryTransport, RemotePeer};
use pam_runtime::App;

use crate::config::CliConfig;
use crate::error::{CliError, Result};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the demo observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoReport {
    pub requests_answered: usize,
    pub messages_dispatched: usize,
    pub clients_served: usize,
}

/// Run the demo with `requests` outbound requests and `clients` inbound clients
pub async fn run_demo(config: &CliConfig, requests: usize, clients: usize) -> Result<DemoReport> {
    let transport = MemoryTransport::new();
    let mut app = App::new(demo_app_config(config), transport.clone())
        .with_runtime_config(config.runtime.clone());
    app.start().await?;

    let mut report = DemoReport {
        requests_answered: outbound_requests(&app, &transport, config.demo_peer(), requests).await?,
        ..DemoReport::default()
    };

    let dispatched = Arc::new(AtomicUsize::new(0));
    register_handlers(&mut app, &dispatched);

    let stop = app.stop_handle();
    let running = tokio::spawn(async move { app.run().await });

    for client in 0..clients {
        let peer = transport.open_session(&format!("org/default/client-{}", client));
        serve_client(&peer, client).await?;
        report.clients_served += 1;
    }

    stop.stop();
    step(running, "dispatch loop shutdown")
        .await?
        .map_err(|err| CliError::Demo(format!("dispatch task failed: {}", err)))??;

    report.messages_dispatched = dispatched.load(Ordering::SeqCst);
    info!(
        requests = report.requests_answered,
        dispatched = report.messages_dispatched,
        clients = report.clients_served,
        "demo finished"
    );
    Ok(report)
}

/// The demo always runs point-to-point; group settings keep their base
fn demo_app_config(config: &CliConfig) -> AppConfig {
    match &config.app {
        AppConfig::P2p(app) => AppConfig::P2p(app.clone()),
        AppConfig::Group(group) => group.base.clone().into(),
    }
}

async fn step<F: core::future::Future>(future: F, what: &str) -> Result<F::Output> {
    timeout(STEP_TIMEOUT, future)
        .await
        .map_err(|_| CliError::Demo(format!("timed out waiting for {}", what)))
}

async fn outbound_requests(
    app: &App<MemoryTransport>,
    transport: &MemoryTransport,
    peer: &str,
    requests: usize,
) -> Result<usize> {
    let session = app.connect(peer).await?;
    let remote = step(transport.next_created(), "outbound session")
        .await?
        .ok_or_else(|| CliError::Demo("transport did not create a session".to_string()))?;
    let echo = spawn_echo(remote);

    let answered = session
        .scoped(|session| async move {
            let mut answered = 0;
            for seq in 0..requests {
                let reply = session
                    .request(Payload::structured(&json!({ "seq": seq }))?, Some(STEP_TIMEOUT))
                    .await?;
                if reply.get("seq") == Some(&json!(seq)) {
                    answered += 1;
                }
                debug!(seq, "request answered");
            }
            Ok::<_, PamError>(answered)
        })
        .await;

    echo.abort();
    Ok(answered??)
}

fn register_handlers(app: &mut App<MemoryTransport>, dispatched: &Arc<AtomicUsize>) {
    let pings = dispatched.clone();
    let others = dispatched.clone();

    app.on_message_where("type", "ping", move |session, message| {
        let pings = pings.clone();
        async move {
            pings.fetch_add(1, Ordering::SeqCst);
            let request = message.into_structured().unwrap_or_default();
            session
                .reply(&request, Payload::structured(&json!({ "type": "pong" }))?)
                .await?;
            Ok(())
        }
    })
    .on_message(move |session, message| {
        let others = others.clone();
        async move {
            others.fetch_add(1, Ordering::SeqCst);
            session.send(message).await?;
            Ok(())
        }
    })
    .on_session_connect(|session| async move {
        info!(session = %session.id(), "client connected");
        Ok(())
    })
    .on_session_disconnect(|session| async move {
        info!(session = %session.id(), "client disconnected");
        Ok(())
    });
}

async fn serve_client(peer: &RemotePeer, client: usize) -> Result<()> {
    let ping = Payload::structured(&json!({
        "type": "ping",
        REQUEST_ID_KEY: format!("client-{}", client),
    }))
    .map_err(PamError::from)?;
    peer.send(ping).map_err(PamError::from)?;

    let pong = step(peer.recv(), "pong").await?;
    if pong.as_ref().and_then(|reply| reply.get("type")) != Some(&json!("pong")) {
        return Err(CliError::Demo(format!("client {} got no pong", client)));
    }

    peer.send(format!("hello from client {}", client))
        .map_err(PamError::from)?;
    let echoed = step(peer.recv(), "echo").await?;
    debug!(client, echoed = ?echoed, "client served");
    peer.end();
    Ok(())
}
