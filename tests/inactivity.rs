use std::time::Duration;

use agent_bridge::names;
use ide_session::{AgentStatus, SessionConfig};
use pretty_assertions::assert_eq;
use serde_json::json;

mod support;

use support::{settle, Harness};

const TIMEOUT: Duration = Duration::from_secs(120);

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

#[tokio::test(start_paused = true)]
async fn silent_thinking_turn_self_heals_to_idle() {
    let harness = Harness::start().await;
    harness
        .session
        .controller()
        .submit("hello")
        .await
        .expect("submit succeeds");
    assert_eq!(harness.status(), AgentStatus::Thinking);
    assert!(harness.is_streaming());

    advance(TIMEOUT - Duration::from_secs(1)).await;
    assert_eq!(harness.status(), AgentStatus::Thinking);

    advance(Duration::from_secs(2)).await;
    assert_eq!(harness.status(), AgentStatus::Idle);
    assert!(!harness.is_streaming());
    assert!(!harness.session.controller().watchdog_armed());
}

#[tokio::test(start_paused = true)]
async fn activity_pushes_the_deadline_out() {
    let harness = Harness::start().await;
    harness
        .session
        .controller()
        .submit("hello")
        .await
        .expect("submit succeeds");

    advance(Duration::from_secs(100)).await;
    harness.emit(names::AGENT_STREAM_CHUNK, json!("still"));
    advance(Duration::from_secs(100)).await;
    harness.emit(names::AGENT_THINKING, json!("still thinking"));
    advance(Duration::from_secs(100)).await;
    assert_eq!(harness.status(), AgentStatus::Thinking);

    advance(Duration::from_secs(21)).await;
    assert_eq!(harness.status(), AgentStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn pending_approval_is_never_timed_out() {
    let harness = Harness::start().await;
    let controller = harness.session.controller();
    controller.submit("edit").await.expect("submit succeeds");
    harness.emit(
        names::AGENT_APPROVAL_REQUEST,
        json!({"tool": "write_file", "parameters": {}}),
    );

    advance(TIMEOUT * 5).await;

    assert_eq!(harness.status(), AgentStatus::Thinking);
    assert!(harness
        .store()
        .read(|store| store.session().pending_tool().is_some()));
}

#[tokio::test(start_paused = true)]
async fn executing_tools_are_not_timed_out() {
    let harness = Harness::start().await;
    harness
        .session
        .controller()
        .submit("run tests")
        .await
        .expect("submit succeeds");
    harness.emit(names::AGENT_STATUS, json!("Executing run_command"));

    advance(TIMEOUT * 2).await;
    assert_eq!(harness.status(), AgentStatus::Executing);

    harness.emit(names::AGENT_STATUS, json!("Thinking..."));
    advance(TIMEOUT + Duration::from_secs(1)).await;
    assert_eq!(harness.status(), AgentStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_is_honored() {
    let config = SessionConfig {
        inactivity_timeout: Duration::from_secs(5),
        ..SessionConfig::default()
    };
    let harness = Harness::start_with(config, |backend| backend).await;
    harness
        .session
        .controller()
        .submit("quick")
        .await
        .expect("submit succeeds");

    advance(Duration::from_secs(6)).await;
    assert_eq!(harness.status(), AgentStatus::Idle);
}
