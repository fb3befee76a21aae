#![allow(dead_code)]

use std::sync::Arc;

use agent_bridge::{AgentBackend, EventTransport};
use agent_bridge_mock::{MockBackend, MockTransport};
use ide_session::{AgentStatus, IdeSession, Notice, SessionConfig, StoreHandle};
use serde_json::Value;

pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub backend: Arc<MockBackend>,
    pub session: IdeSession,
}

impl Harness {
    /// Started session over a fresh mock transport and default backend.
    pub async fn start() -> Self {
        Self::start_with(SessionConfig::default(), |backend| backend).await
    }

    pub async fn start_with(
        config: SessionConfig,
        configure: impl FnOnce(MockBackend) -> MockBackend,
    ) -> Self {
        let harness = Self::build(config, configure);
        assert!(harness.session.start().await, "first start should run");
        harness
    }

    /// Session that has not been started yet.
    pub fn build(
        config: SessionConfig,
        configure: impl FnOnce(MockBackend) -> MockBackend,
    ) -> Self {
        let transport = Arc::new(MockTransport::new());
        let backend = Arc::new(configure(
            MockBackend::new().with_events(Arc::clone(&transport)),
        ));
        let session = IdeSession::new(
            config,
            Some(Arc::clone(&transport) as Arc<dyn EventTransport>),
            Arc::clone(&backend) as Arc<dyn AgentBackend>,
        )
        .expect("session should build");

        Self {
            transport,
            backend,
            session,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        self.session.store()
    }

    /// Delivers a backend event; returns how many handlers saw it.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.transport.emit_from_backend(event, payload)
    }

    pub fn status(&self) -> AgentStatus {
        self.store().read(|store| store.session().status().clone())
    }

    pub fn is_streaming(&self) -> bool {
        self.store().read(|store| store.session().is_streaming())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.store().read(|store| store.notices().cloned().collect())
    }
}

/// Lets spawned background work (file loads, timers that already fired) run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
