//! Bootstrap facade wiring the store, controller and helpers together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agent_bridge::{names, AgentBackend, ConnectionMode, EventTransport};
use prefs_store::PrefsStore;
use serde_json::Value;
use tracing::{info, warn};

use crate::channel::EventChannel;
use crate::config::SessionConfig;
use crate::connection::{ConnectionSwitch, SharedPrefs};
use crate::controller::SessionController;
use crate::error::SessionError;
use crate::history::ConversationHistory;
use crate::lock_unpoisoned;
use crate::store::{SessionStore, StoreHandle};
use crate::updates::UpdateChecker;
use crate::workspace::EditorWorkspace;

/// One IDE window's session core.
///
/// Each event-consuming component owns its own [`EventChannel`], so tearing
/// one down never revokes another's subscriptions.
pub struct IdeSession {
    config: SessionConfig,
    store: StoreHandle,
    controller: Arc<SessionController>,
    connection: Arc<ConnectionSwitch>,
    updates: Arc<UpdateChecker>,
    workspace: EditorWorkspace,
    history: ConversationHistory,
    signals: EventChannel,
    prefs: Option<SharedPrefs>,
    started: AtomicBool,
}

impl IdeSession {
    /// Builds every component. Nothing is subscribed until [`IdeSession::start`].
    ///
    /// Fails only when a configured preferences file exists but cannot be read.
    pub fn new(
        config: SessionConfig,
        transport: Option<Arc<dyn EventTransport>>,
        backend: Arc<dyn AgentBackend>,
    ) -> Result<Self, SessionError> {
        let prefs = match config.prefs_path() {
            Some(path) => Some(Arc::new(Mutex::new(PrefsStore::open_or_default(&path)?))),
            None => None,
        };

        let store = StoreHandle::new(SessionStore::new(
            config.audit_capacity,
            config.notice_capacity,
        ));
        let channel = || EventChannel::new(transport.clone());

        let controller = SessionController::new(
            store.clone(),
            Arc::clone(&backend),
            channel(),
            &config,
        );
        let connection = ConnectionSwitch::new(
            store.clone(),
            Arc::clone(&backend),
            channel(),
            prefs.clone(),
            config.switch_timeout,
        );
        let updates = UpdateChecker::new(store.clone(), Arc::clone(&backend), channel());
        let workspace = EditorWorkspace::new(store.clone(), Arc::clone(&backend));
        let history = ConversationHistory::new(store.clone(), backend);

        Ok(Self {
            signals: channel(),
            config,
            store,
            controller,
            connection,
            updates,
            workspace,
            history,
            prefs,
            started: AtomicBool::new(false),
        })
    }

    /// Subscribes every component, then tells the backend it may start
    /// emitting. Only the first call does anything; returns whether it ran.
    pub async fn start(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let agent = self.controller.attach().await;
        let setup = self.connection.attach().await;
        let updates = self.updates.attach().await;
        let delivered = self.signals.emit(names::FRONTEND_LOADED, Value::Null).await;
        if !delivered {
            warn!("backend was not told the frontend loaded; events may never arrive");
        }

        info!(agent, setup, updates, delivered, "ide session started");
        true
    }

    /// Tears down every subscriber. Returns the number of listeners removed.
    pub fn shutdown(&self) -> usize {
        let removed = self.controller.teardown()
            + self.connection.teardown()
            + self.updates.teardown()
            + self.signals.close();
        info!(removed, "ide session shut down");
        removed
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionSwitch> {
        &self.connection
    }

    #[must_use]
    pub fn updates(&self) -> &Arc<UpdateChecker> {
        &self.updates
    }

    #[must_use]
    pub fn workspace(&self) -> &EditorWorkspace {
        &self.workspace
    }

    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn onboarding_complete(&self) -> Result<bool, SessionError> {
        let prefs = self.prefs()?;
        let complete = lock_unpoisoned(prefs).onboarding_complete();
        Ok(complete)
    }

    pub fn complete_onboarding(&self) -> Result<(), SessionError> {
        let mut prefs = lock_unpoisoned(self.prefs()?);
        prefs.set_onboarding_complete(true);
        prefs.save()?;
        Ok(())
    }

    pub fn default_connection_mode(&self) -> Result<ConnectionMode, SessionError> {
        let prefs = self.prefs()?;
        let mode = lock_unpoisoned(prefs).default_connection_mode();
        Ok(mode)
    }

    pub fn set_default_connection_mode(&self, mode: ConnectionMode) -> Result<(), SessionError> {
        let mut prefs = lock_unpoisoned(self.prefs()?);
        prefs.set_default_connection_mode(mode);
        prefs.save()?;
        Ok(())
    }

    fn prefs(&self) -> Result<&SharedPrefs, SessionError> {
        self.prefs.as_ref().ok_or(SessionError::PrefsUnavailable)
    }
}

impl Drop for IdeSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
