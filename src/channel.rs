//! Event channel adapter over the host transport.
//!
//! Registration is asynchronous and may resolve after the owner has been torn
//! down. A subscription that resolves late is revoked on the spot instead of
//! being stored, and every delivered payload is dropped once the owner's
//! [`LifecycleToken`] is revoked.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agent_bridge::{BackendEvent, EventHandler, EventTransport, Unlisten};
use serde_json::Value;
use tracing::{debug, warn};

use crate::lock_unpoisoned;

/// Typed callback invoked with decoded backend events.
pub type TypedHandler = Arc<dyn Fn(BackendEvent) + Send + Sync>;

/// Shared "still alive" flag checked by every handler before touching state.
#[derive(Debug, Clone)]
pub struct LifecycleToken {
    alive: Arc<AtomicBool>,
}

impl Default for LifecycleToken {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Marks the owner dead. Returns true on the first call only.
    pub fn revoke(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }
}

/// Handle to one registered listener. Revocable exactly once.
pub struct Subscription {
    event: String,
    unlisten: Mutex<Option<Unlisten>>,
}

impl Subscription {
    fn active(event: &str, unlisten: Unlisten) -> Self {
        Self {
            event: event.to_string(),
            unlisten: Mutex::new(Some(unlisten)),
        }
    }

    /// Handle with nothing behind it, returned when registration failed softly.
    #[must_use]
    pub fn inert(event: &str) -> Self {
        Self {
            event: event.to_string(),
            unlisten: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        lock_unpoisoned(&self.unlisten).is_some()
    }

    /// Removes the listener. Later calls are no-ops and return false.
    pub fn revoke(&self) -> bool {
        let unlisten = lock_unpoisoned(&self.unlisten).take();
        match unlisten {
            Some(unlisten) => {
                unlisten();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.revoke();
    }
}

/// Subscriptions owned by one component, plus that component's lifecycle token.
pub struct EventChannel {
    transport: Option<Arc<dyn EventTransport>>,
    lifecycle: LifecycleToken,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
}

impl EventChannel {
    /// Channel over `transport`; `None` behaves like a host without an event bridge.
    #[must_use]
    pub fn new(transport: Option<Arc<dyn EventTransport>>) -> Self {
        Self {
            transport,
            lifecycle: LifecycleToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> LifecycleToken {
        self.lifecycle.clone()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        lock_unpoisoned(&self.subscriptions)
            .iter()
            .filter(|subscription| subscription.is_active())
            .count()
    }

    /// Registers a raw JSON handler for `event`.
    ///
    /// Never fails: an unavailable transport or a closed channel yields an
    /// inert handle.
    pub async fn subscribe(&self, event: &str, handler: EventHandler) -> Arc<Subscription> {
        let Some(transport) = self.transport.as_ref() else {
            debug!(event, "no event transport; subscription is inert");
            return Arc::new(Subscription::inert(event));
        };

        if !self.lifecycle.is_alive() {
            debug!(event, "channel closed before subscribe");
            return Arc::new(Subscription::inert(event));
        }

        let token = self.lifecycle.clone();
        let guarded: EventHandler = Arc::new(move |payload: Value| {
            if token.is_alive() {
                handler(payload);
            }
        });

        let unlisten = match transport.listen(event, guarded).await {
            Ok(unlisten) => unlisten,
            Err(error) => {
                warn!(event, %error, "event subscription failed; continuing without it");
                return Arc::new(Subscription::inert(event));
            }
        };

        let subscription = Arc::new(Subscription::active(event, unlisten));
        {
            let mut subscriptions = lock_unpoisoned(&self.subscriptions);
            if self.lifecycle.is_alive() {
                subscriptions.push(Arc::clone(&subscription));
                return subscription;
            }
        }

        debug!(event, "registration resolved after close; revoking");
        subscription.revoke();
        subscription
    }

    /// Registers `handler` for each name in `events`, decoding payloads first.
    /// Returns the number of subscriptions that are live afterwards.
    pub async fn subscribe_all(&self, events: &[&str], handler: TypedHandler) -> usize {
        let mut active = 0;
        for &event in events {
            let name = event.to_string();
            let typed = Arc::clone(&handler);
            let raw: EventHandler = Arc::new(move |payload: Value| {
                match BackendEvent::decode(&name, payload) {
                    Ok(decoded) => typed(decoded),
                    Err(error) => {
                        warn!(event = %name, %error, "dropping undecodable backend event")
                    }
                }
            });

            if self.subscribe(event, raw).await.is_active() {
                active += 1;
            }
        }

        active
    }

    /// Sends a client signal to the backend. Returns false when it could not be delivered.
    pub async fn emit(&self, event: &str, payload: Value) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            debug!(event, "no event transport; dropping client signal");
            return false;
        };

        match transport.emit(event, payload).await {
            Ok(()) => true,
            Err(error) => {
                warn!(event, %error, "client signal could not be delivered");
                false
            }
        }
    }

    /// Revokes the lifecycle token and every stored subscription.
    /// Returns the number of listeners actually removed.
    pub fn close(&self) -> usize {
        let drained = {
            let mut subscriptions = lock_unpoisoned(&self.subscriptions);
            self.lifecycle.revoke();
            std::mem::take(&mut *subscriptions)
        };

        drained
            .iter()
            .filter(|subscription| subscription.revoke())
            .count()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}
