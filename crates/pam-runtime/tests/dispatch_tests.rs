//! Integration tests for handler routing and failure isolation

use std::sync::{Arc, Mutex};

use pam_core::{FailureSite, Payload, Session, SharedObserver};
use pam_harness::{MemoryTransport, RecordingObserver};
use pam_runtime::{DispatchOutcome, HandlerRegistry, Multiplexer, Route};
use serde_json::json;

type Calls = Arc<Mutex<Vec<&'static str>>>;

fn recorder(calls: &Calls, label: &'static str) -> impl Fn(Session, Payload) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
    let calls = calls.clone();
    move |_, _| {
        calls.lock().unwrap().push(label);
        futures::future::ready(Ok(()))
    }
}

fn structured(value: serde_json::Value) -> Payload {
    Payload::structured(&value).unwrap()
}

async fn any_session(transport: &MemoryTransport) -> Session {
    let _peer = transport.open_session("org/ns/peer");
    Multiplexer::new(Arc::new(transport.clone()))
        .accept()
        .await
        .unwrap()
}

#[test]
fn test_filtered_handler_beats_catch_all() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry
        .on_message(recorder(&calls, "catch-all"))
        .on_message_where("type", "prompt", recorder(&calls, "prompt"));

    assert_eq!(registry.route(&structured(json!({"type": "prompt"}))), Route::Filtered(1));
    assert_eq!(registry.route(&structured(json!({"type": "other"}))), Route::CatchAll(0));
    assert_eq!(registry.route(&Payload::from("plain text")), Route::CatchAll(0));
}

#[test]
fn test_first_matching_registrations_win() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry
        .on_message_where("type", "prompt", recorder(&calls, "first"))
        .on_message_where("type", "prompt", recorder(&calls, "second"))
        .on_message(recorder(&calls, "catch-all one"))
        .on_message(recorder(&calls, "catch-all two"));

    assert_eq!(registry.route(&structured(json!({"type": "prompt"}))), Route::Filtered(0));
    assert_eq!(registry.route(&structured(json!({"kind": "prompt"}))), Route::CatchAll(2));
}

#[test]
fn test_unmatched_without_catch_all() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.on_message_where("type", "prompt", recorder(&calls, "prompt"));

    assert_eq!(registry.route(&structured(json!({"type": 1}))), Route::Unhandled);
    assert_eq!(registry.route(&Payload::Bytes(vec![1, 2])), Route::Unhandled);
}

#[test]
fn test_predicate_filter_sees_any_payload() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.on_message_matching(
        |message: &Payload| message.as_bytes().is_some(),
        recorder(&calls, "binary"),
    );

    assert_eq!(registry.route(&Payload::Bytes(vec![0])), Route::Filtered(0));
    assert_eq!(registry.route(&Payload::from("text")), Route::Unhandled);
}

#[test]
fn test_null_filter_matches_missing_key() {
    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.on_message_where("reply_to", serde_json::Value::Null, recorder(&calls, "fresh"));

    assert_eq!(registry.route(&structured(json!({"type": "prompt"}))), Route::Filtered(0));
    assert_eq!(registry.route(&structured(json!({"reply_to": null}))), Route::Filtered(0));
    assert_eq!(registry.route(&structured(json!({"reply_to": "abc"}))), Route::Unhandled);
    assert_eq!(registry.route(&Payload::from("not structured")), Route::Unhandled);
}

#[tokio::test]
async fn test_dispatch_invokes_only_the_selected_handler() {
    let transport = MemoryTransport::new();
    let session = any_session(&transport).await;
    let observer: SharedObserver = Arc::new(RecordingObserver::new());

    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry
        .on_message_where("type", "prompt", recorder(&calls, "prompt"))
        .on_message(recorder(&calls, "catch-all"));

    let outcome = registry
        .dispatch(&session, structured(json!({"type": "prompt"})), &observer)
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(*calls.lock().unwrap(), vec!["prompt"]);

    registry
        .dispatch(&session, structured(json!({"type": "other"})), &observer)
        .await;
    assert_eq!(*calls.lock().unwrap(), vec!["prompt", "catch-all"]);
}

#[tokio::test]
async fn test_handler_failures_are_isolated() {
    let transport = MemoryTransport::new();
    let session = any_session(&transport).await;
    let recording = RecordingObserver::new();
    let observer: SharedObserver = Arc::new(recording.clone());

    let mut registry = HandlerRegistry::new();
    registry
        .on_message_where("type", "fail", |_, _| async {
            Err(anyhow::anyhow!("handler rejected message"))
        })
        .on_message_where("type", "panic", |_, _| async {
            if true {
                panic!("handler blew up");
            }
            Ok(())
        })
        .on_message(|_, _| async { Ok(()) });

    let failed = registry
        .dispatch(&session, structured(json!({"type": "fail"})), &observer)
        .await;
    let panicked = registry
        .dispatch(&session, structured(json!({"type": "panic"})), &observer)
        .await;
    let handled = registry
        .dispatch(&session, structured(json!({"type": "ok"})), &observer)
        .await;

    assert_eq!(failed, DispatchOutcome::Failed);
    assert_eq!(panicked, DispatchOutcome::Failed);
    assert_eq!(handled, DispatchOutcome::Handled);

    let failures = recording.failures();
    assert_eq!(recording.count(FailureSite::Handler), 2);
    assert!(failures[0].error.contains("handler rejected message"));
    assert!(failures[1].error.contains("handler blew up"));
    assert_eq!(failures[0].session_id, Some(session.id()));
}

#[tokio::test]
async fn test_unhandled_message_is_dropped() {
    let transport = MemoryTransport::new();
    let session = any_session(&transport).await;
    let recording = RecordingObserver::new();
    let observer: SharedObserver = Arc::new(recording.clone());

    let calls = Calls::default();
    let mut registry = HandlerRegistry::new();
    registry.on_message_where("type", "prompt", recorder(&calls, "prompt"));

    let outcome = registry
        .dispatch(&session, Payload::from("nobody wants this"), &observer)
        .await;
    assert_eq!(outcome, DispatchOutcome::Unhandled);
    assert!(calls.lock().unwrap().is_empty());
    assert!(recording.is_empty());
}
