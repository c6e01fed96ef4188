//! Integration tests for the application facade

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pam_core::{
    BaseConfig, ConfigError, GroupConfig, Name, P2pConfig, PamError, Payload, RuntimeConfig,
    SessionConfig, SessionKind,
};
use pam_harness::{spawn_echo, MemoryTransport, RecordingObserver};
use pam_runtime::{App, RuntimeError};
use serde_json::json;
use tokio::time::{sleep, timeout, Duration};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(5);

fn p2p_config() -> P2pConfig {
    let mut config = P2pConfig::new("org/ns/app/inst", "memory://local");
    config.base.auth_secret = Some("secret".into());
    config
}

fn app(transport: &MemoryTransport) -> App<MemoryTransport> {
    App::new(p2p_config(), transport.clone()).with_runtime_config(RuntimeConfig::testing())
}

#[tokio::test]
async fn test_start_requires_auth_secret() {
    let transport = MemoryTransport::new();
    let config = P2pConfig::new("org/ns/app", "memory://local");
    let mut app = App::new(config, transport.clone());

    let err = app.start().await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(PamError::Config(ConfigError::Authentication { .. }))
    ));
    assert_eq!(transport.stats().connects, 0);
}

#[tokio::test]
async fn test_start_rejects_malformed_local_name() {
    let transport = MemoryTransport::new();
    let config = BaseConfig::new("org/app", "memory://local").with_auth_secret("s");
    let mut app = App::new(config, transport);

    let err = app.start().await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Core(PamError::Config(ConfigError::InvalidName { .. }))
    ));
}

#[tokio::test]
async fn test_start_connects_once() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);

    assert_ok!(app.start().await);
    assert_eq!(app.local_name().map(ToString::to_string).as_deref(), Some("org/ns/app/inst"));

    let params = transport.connected().unwrap();
    assert_eq!(params.endpoint, "memory://local");
    assert!(!format!("{:?}", params.provider).contains("secret\""));

    assert!(matches!(app.start().await, Err(RuntimeError::AlreadyStarted)));
    assert_eq!(transport.stats().connects, 1);
}

#[tokio::test]
async fn test_sessions_require_start() {
    let transport = MemoryTransport::new();
    let app = app(&transport);
    assert!(matches!(app.connect("org/ns/peer").await, Err(RuntimeError::NotStarted)));
    assert!(matches!(app.messages(), Err(RuntimeError::NotStarted)));
}

#[tokio::test]
async fn test_run_without_handlers_fails() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    assert!(matches!(app.run().await, Err(RuntimeError::NoHandlers)));
    assert_eq!(transport.stats().connects, 0);
}

#[tokio::test]
async fn test_connect_routes_and_creates_point_to_point_session() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    assert_ok!(app.start().await);

    let session = app.connect("org/ns/peer/ignored-instance").await.unwrap();
    assert_eq!(session.kind(), SessionKind::PointToPoint);

    let peer = Name::parse("org/ns/peer").unwrap();
    assert_eq!(transport.routes(), vec![peer.clone()]);
    assert_eq!(
        transport.created_configs(),
        vec![SessionConfig::PointToPoint {
            peer,
            max_retries: 5,
            timeout: Duration::from_secs(5),
            mls_enabled: true,
        }]
    );

    let remote = transport.next_created().await.unwrap();
    let echo = spawn_echo(remote);
    session.enter().unwrap();
    let request = Payload::structured(&json!({"q": "hi"})).unwrap();
    let reply = timeout(WAIT, session.request(request, None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.get("q"), Some(&json!("hi")));

    session.exit().await;
    echo.abort();
}

#[tokio::test]
async fn test_create_channel_invites_participants() {
    let transport = MemoryTransport::new();
    let mut config = GroupConfig::new("org/ns/moderator", "memory://local");
    config.base.auth_secret = Some("secret".into());
    let mut app = App::new(config, transport.clone());
    assert_ok!(app.start().await);

    let session = app
        .create_channel("org/ns/room", &["org/ns/alice", "org/ns/bob"])
        .await
        .unwrap();
    assert_eq!(session.kind(), SessionKind::Group);

    let remote = transport.next_created().await.unwrap();
    let members: Vec<String> = remote.members().iter().map(ToString::to_string).collect();
    assert_eq!(members, vec!["org/ns/alice", "org/ns/bob"]);
    assert_eq!(transport.routes().len(), 2);

    assert!(app.create_channel("org/ns/room", &["bad"]).await.is_err());
}

#[tokio::test]
async fn test_accept_and_join_channel_wrap_inbound_sessions() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    assert_ok!(app.start().await);

    let peer = transport.open_session("org/ns/caller");
    let session = timeout(WAIT, app.accept()).await.unwrap().unwrap();
    assert_eq!(session.id(), peer.id());

    let group = transport.open_group("org/ns/room");
    let joined = timeout(WAIT, app.join_channel()).await.unwrap().unwrap();
    assert_eq!(joined.id(), group.id());
    assert_eq!(joined.kind(), SessionKind::Group);
}

#[tokio::test]
async fn test_run_dispatches_until_stopped() {
    let transport = MemoryTransport::new();
    let observer = RecordingObserver::new();
    let mut app = app(&transport).with_observer(Arc::new(observer.clone()));

    app.on_message_where("type", "prompt", |session, message| async move {
        let request = message.into_structured().unwrap_or_default();
        session
            .reply(&request, Payload::structured(&json!({"answer": 42}))?)
            .await?;
        Ok(())
    })
    .on_message(|session, message| async move {
        session.send(format!("echo: {}", message)).await?;
        Ok(())
    })
    .on_message_where("type", "broken", |_, _| async {
        Err(anyhow::anyhow!("cannot handle"))
    });

    let stop = app.stop_handle();
    let running = tokio::spawn(async move {
        let result = app.run().await;
        (app, result)
    });

    let peer = transport.open_session("org/ns/client");

    peer.send(Payload::structured(&json!({"type": "prompt", "_request_id": "r-1"})).unwrap())
        .unwrap();
    let reply = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    assert_eq!(reply.get("answer"), Some(&json!(42)));
    assert_eq!(reply.get("_request_id"), Some(&json!("r-1")));

    peer.send(Payload::structured(&json!({"type": "broken"})).unwrap())
        .unwrap();
    peer.send("plain").unwrap();
    let echoed = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    assert_eq!(echoed, Payload::from("echo: plain"));

    stop.stop();
    let (_app, result) = timeout(WAIT, running).await.unwrap().unwrap();
    result.unwrap();

    assert_eq!(observer.failures().len(), 1);
    assert!(transport.stats().is_idle());
}

#[tokio::test]
async fn test_run_returns_accept_failure() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    app.on_message(|_, _| async { Ok(()) });

    transport.fail_accept("transport went away");
    let result = timeout(WAIT, app.run()).await.unwrap();
    assert!(matches!(result, Err(RuntimeError::AcceptLoop(_))));
}

#[tokio::test]
async fn test_listen_yields_accepted_sessions_then_the_failure() {
    use futures::StreamExt;

    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    assert!(matches!(app.listen(), Err(RuntimeError::NotStarted)));
    assert_ok!(app.start().await);

    let peer = transport.open_session("org/ns/caller");
    transport.shutdown();

    let mut sessions = app.listen().unwrap();
    let accepted = timeout(WAIT, sessions.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(accepted.id(), peer.id());
    assert!(timeout(WAIT, sessions.next()).await.unwrap().unwrap().is_err());
    assert!(timeout(WAIT, sessions.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_during_failure_teardown_leaves_nothing_running() {
    let transport = MemoryTransport::new();
    let mut app = app(&transport);
    let connected = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::new(AtomicUsize::new(0));

    let seen = connected.clone();
    let counter = ticks.clone();
    app.on_message(|_, _| async { Ok(()) })
        .on_session_connect(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .on_session_disconnect(move |_| {
            let counter = counter.clone();
            async move {
                while counter.fetch_add(1, Ordering::SeqCst) < usize::MAX {
                    sleep(Duration::from_millis(5)).await;
                }
                Ok(())
            }
        });

    let stop = app.stop_handle();
    let running = tokio::spawn(async move { app.run().await });

    let _peer = transport.open_session("org/ns/client");
    timeout(WAIT, async {
        while connected.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // The failing accept starts teardown; the disconnect hook keeps it busy
    transport.fail_accept("listener crashed");
    timeout(WAIT, async {
        while ticks.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    stop.stop();
    let result = timeout(WAIT, running).await.unwrap().unwrap();
    assert!(result.is_ok());

    sleep(Duration::from_millis(30)).await;
    let settled = ticks.load(Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
    assert!(transport.stats().is_idle());
}
