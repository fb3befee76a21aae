use std::sync::{Arc, Mutex, Weak};

use agent_bridge::{EventHandler, EventTransport, TransportError, Unlisten};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::lock_unpoisoned;

struct Listener {
    id: u64,
    event: String,
    handler: EventHandler,
}

#[derive(Default)]
struct TransportState {
    next_id: u64,
    listeners: Vec<Listener>,
    client_emits: Vec<(String, Value)>,
    registrations: usize,
    revocations: usize,
}

/// In-memory publish/subscribe bus standing in for the host event bridge.
///
/// `emit_from_backend` dispatches synchronously on the caller's turn, in
/// registration order, which matches the host's same-name ordering guarantee.
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    available: bool,
    registration_gate: Option<watch::Sender<bool>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            available: true,
            registration_gate: None,
        }
    }

    /// Transport whose `listen` and `emit` always fail, as when running outside the host.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Transport whose `listen` calls stay pending until [`Self::open_registration_gate`].
    #[must_use]
    pub fn with_registration_gate() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            registration_gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn open_registration_gate(&self) {
        if let Some(gate) = &self.registration_gate {
            gate.send_replace(true);
        }
    }

    /// Delivers a backend event to every current listener of `event`.
    /// Returns the number of handlers invoked.
    pub fn emit_from_backend(&self, event: &str, payload: Value) -> usize {
        let handlers: Vec<EventHandler> = {
            let state = lock_unpoisoned(&self.state);
            state
                .listeners
                .iter()
                .filter(|listener| listener.event == event)
                .map(|listener| Arc::clone(&listener.handler))
                .collect()
        };

        for handler in &handlers {
            handler(payload.clone());
        }

        handlers.len()
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        lock_unpoisoned(&self.state)
            .listeners
            .iter()
            .filter(|listener| listener.event == event)
            .count()
    }

    #[must_use]
    pub fn total_listeners(&self) -> usize {
        lock_unpoisoned(&self.state).listeners.len()
    }

    /// Number of listen calls that completed registration.
    #[must_use]
    pub fn registrations(&self) -> usize {
        lock_unpoisoned(&self.state).registrations
    }

    /// Number of unlisten calls that removed a listener.
    #[must_use]
    pub fn revocations(&self) -> usize {
        lock_unpoisoned(&self.state).revocations
    }

    /// Client-to-backend signals emitted so far, in order.
    #[must_use]
    pub fn client_emits(&self) -> Vec<(String, Value)> {
        lock_unpoisoned(&self.state).client_emits.clone()
    }
}

fn revoke_listener(state: &Weak<Mutex<TransportState>>, id: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };

    let mut state = lock_unpoisoned(&state);
    let before = state.listeners.len();
    state.listeners.retain(|listener| listener.id != id);
    if state.listeners.len() < before {
        state.revocations += 1;
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn listen(&self, event: &str, handler: EventHandler) -> Result<Unlisten, TransportError> {
        if !self.available {
            return Err(TransportError::Unavailable(
                "mock transport is detached".to_string(),
            ));
        }

        if let Some(gate) = &self.registration_gate {
            let mut opened = gate.subscribe();
            let _ = opened.wait_for(|open| *open).await;
        }

        let id = {
            let mut state = lock_unpoisoned(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.registrations += 1;
            state.listeners.push(Listener {
                id,
                event: event.to_string(),
                handler,
            });
            id
        };

        let state = Arc::downgrade(&self.state);
        Ok(Box::new(move || revoke_listener(&state, id)))
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::Unavailable(
                "mock transport is detached".to_string(),
            ));
        }

        lock_unpoisoned(&self.state)
            .client_emits
            .push((event.to_string(), payload));
        Ok(())
    }
}
