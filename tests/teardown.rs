use std::sync::Arc;
use std::time::Duration;

use agent_bridge::{names, AgentBackend, EventTransport, AGENT_EVENTS, SETUP_EVENTS, UPDATE_EVENTS};
use agent_bridge_mock::{CallKind, MockBackend, MockTransport};
use assert_matches::assert_matches;
use ide_session::{
    AgentStatus, EventChannel, IdeSession, SessionConfig, SessionController, SessionError,
    StoreHandle, SubmitOutcome,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

mod support;

use support::{settle, Harness};

#[tokio::test]
async fn frontend_loaded_is_signalled_exactly_once() {
    let harness = Harness::start().await;

    assert!(!harness.session.start().await);
    assert_eq!(
        harness.transport.client_emits(),
        vec![(names::FRONTEND_LOADED.to_string(), Value::Null)]
    );
}

#[tokio::test]
async fn start_subscribes_every_backend_event_once() {
    let harness = Harness::start().await;

    for event in AGENT_EVENTS.iter().chain(SETUP_EVENTS).chain(UPDATE_EVENTS) {
        assert_eq!(harness.transport.listener_count(event), 1, "{event}");
    }
}

#[tokio::test]
async fn shutdown_revokes_everything_and_blocks_further_work() {
    let harness = Harness::start().await;
    let expected = AGENT_EVENTS.len() + SETUP_EVENTS.len() + UPDATE_EVENTS.len();
    assert_eq!(harness.transport.total_listeners(), expected);

    assert_eq!(harness.session.shutdown(), expected);
    assert_eq!(harness.transport.total_listeners(), 0);
    assert_eq!(harness.session.shutdown(), 0);

    let revision = harness.store().revision();
    assert_eq!(harness.emit(names::AGENT_STREAM_CHUNK, json!("late")), 0);
    assert_eq!(harness.store().revision(), revision);

    assert_matches!(
        harness.session.controller().submit("after shutdown").await,
        Err(SessionError::TornDown)
    );
    assert_eq!(harness.backend.call_count(CallKind::StartAgentTask), 0);
}

#[tokio::test]
async fn dropping_the_session_unsubscribes() {
    let Harness {
        transport, session, ..
    } = Harness::start().await;
    assert!(transport.total_listeners() > 0);

    drop(session);

    assert_eq!(transport.total_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn watchdog_does_not_fire_after_shutdown() {
    let harness = Harness::start().await;
    harness
        .session
        .controller()
        .submit("work")
        .await
        .expect("submit succeeds");
    harness.session.shutdown();
    let revision = harness.store().revision();

    tokio::time::sleep(Duration::from_secs(600)).await;
    settle().await;

    assert_eq!(harness.store().revision(), revision);
    assert!(!harness.session.controller().watchdog_armed());
}

#[tokio::test]
async fn registration_resolving_after_teardown_is_revoked() {
    let transport = Arc::new(MockTransport::with_registration_gate());
    let controller = SessionController::new(
        StoreHandle::default(),
        Arc::new(MockBackend::new()) as Arc<dyn AgentBackend>,
        EventChannel::new(Some(Arc::clone(&transport) as Arc<dyn EventTransport>)),
        &SessionConfig::default(),
    );

    let attaching = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.attach().await }
    });
    settle().await;

    assert_eq!(controller.teardown(), 0);
    transport.open_registration_gate();
    let active = attaching.await.expect("attach task completes");

    assert_eq!(active, 0);
    assert_eq!(transport.registrations(), 1);
    assert_eq!(transport.revocations(), 1);
    assert_eq!(transport.total_listeners(), 0);
}

#[tokio::test]
async fn unavailable_transport_degrades_without_failing() {
    let transport = Arc::new(MockTransport::unavailable());
    let backend = Arc::new(MockBackend::new());
    let session = IdeSession::new(
        SessionConfig::default(),
        Some(transport as Arc<dyn EventTransport>),
        Arc::clone(&backend) as Arc<dyn AgentBackend>,
    )
    .expect("session should build");

    assert!(session.start().await);
    assert_eq!(
        session.controller().submit("offline host").await.expect("submit succeeds"),
        SubmitOutcome::Started
    );
    assert_eq!(backend.call_count(CallKind::StartAgentTask), 1);
    assert_eq!(
        session.store().read(|store| store.session().status().clone()),
        AgentStatus::Thinking
    );
    assert_eq!(session.shutdown(), 0);
}

#[tokio::test]
async fn missing_transport_is_treated_like_an_unavailable_one() {
    let session = IdeSession::new(
        SessionConfig::default(),
        None,
        Arc::new(MockBackend::new()) as Arc<dyn AgentBackend>,
    )
    .expect("session should build");

    assert!(session.start().await);
    assert!(session.controller().is_alive());
    assert_eq!(session.shutdown(), 0);
    assert!(!session.controller().is_alive());
}
