//! Agent session controller: folds backend agent events into the store.
//!
//! Events are applied in arrival order and every rule is written so that a
//! late, duplicated or reordered event leaves the store in a valid state.
//! After a user cancel the controller drains the cancelled turn: activity
//! events are dropped until a terminal event or the next submit.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use agent_bridge::{
    AgentBackend, BackendEvent, FileAccessAction, StatusSignal, StreamEndReason, AGENT_EVENTS,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, TypedHandler};
use crate::config::SessionConfig;
use crate::dedup::{Attempt, DedupGuard, SkipReason};
use crate::error::SessionError;
use crate::lock_unpoisoned;
use crate::store::{
    AgentStatus, FileSource, MessageRole, NoticeLevel, PendingTool, StoreHandle, ToolExecution,
    ToolInvocation,
};
use crate::watchdog::DeadlineTimer;
use crate::workspace::load_file_into_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started,
    /// The send guard rejected a duplicate submission.
    Skipped(SkipReason),
    /// A turn is already running or waiting on an approval.
    Busy,
    /// The prompt was blank.
    Empty,
}

struct ApprovedTool {
    tool: PendingTool,
    approved_at: Instant,
}

#[derive(Default)]
struct TurnState {
    draining_cancelled: bool,
    approved: Option<ApprovedTool>,
}

pub struct SessionController {
    store: StoreHandle,
    backend: Arc<dyn AgentBackend>,
    channel: EventChannel,
    watchdog: DeadlineTimer,
    send_guard: DedupGuard,
    send_interval: Duration,
    turn: Mutex<TurnState>,
}

impl SessionController {
    /// Creates a detached controller. Call [`SessionController::attach`] to
    /// start receiving backend events.
    pub fn new(
        store: StoreHandle,
        backend: Arc<dyn AgentBackend>,
        channel: EventChannel,
        config: &SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            channel,
            watchdog: DeadlineTimer::new(config.inactivity_timeout),
            send_guard: DedupGuard::new(),
            send_interval: config.send_interval,
            turn: Mutex::new(TurnState::default()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    /// True while the inactivity watchdog is armed.
    #[must_use]
    pub fn watchdog_armed(&self) -> bool {
        self.watchdog.is_armed()
    }

    /// Subscribes to every agent event. Returns the number of live subscriptions.
    pub async fn attach(self: &Arc<Self>) -> usize {
        let controller: Weak<Self> = Arc::downgrade(self);
        let handler: TypedHandler = Arc::new(move |event| {
            if let Some(controller) = controller.upgrade() {
                controller.apply(event);
            }
        });

        let active = self.channel.subscribe_all(AGENT_EVENTS, handler).await;
        info!(active, "agent session controller attached");
        active
    }

    /// Applies one backend event.
    pub fn apply(self: &Arc<Self>, event: BackendEvent) {
        if !self.is_alive() {
            debug!(?event, "controller torn down; dropping event");
            return;
        }

        if self.is_draining() && !drain_passes(&event) {
            debug!(?event, "dropping event from cancelled turn");
            return;
        }

        match event {
            BackendEvent::Thinking(text) => {
                self.store.update(|store| store.set_thinking_text(text));
                self.arm_watchdog();
            }
            BackendEvent::StreamChunk(text) => {
                self.store.update(|store| {
                    store.update_streaming_tail(text);
                    store.set_streaming(true);
                });
                self.arm_watchdog();
            }
            BackendEvent::Streaming(true) => {
                self.store.update(|store| {
                    store.set_streaming(true);
                    store.set_status(AgentStatus::Thinking);
                });
                self.arm_watchdog();
            }
            BackendEvent::Streaming(false) => {
                self.store.update(|store| store.set_streaming(false));
            }
            BackendEvent::Status(raw) => self.on_status(&raw),
            BackendEvent::ToolResult {
                tool,
                parameters,
                result,
            } => self.on_tool_result(tool, parameters, result),
            BackendEvent::ApprovalRequest { tool, parameters } => {
                self.watchdog.disarm();
                self.store.update(|store| {
                    store.set_pending_tool(Some(PendingTool {
                        name: tool,
                        args: parameters,
                    }));
                });
            }
            BackendEvent::FileAccess { action, path } => self.on_file_access(&action, path),
            BackendEvent::MessageComplete { content } => {
                self.store
                    .update(|store| store.update_streaming_tail(content));
            }
            BackendEvent::StreamEnd(reason) => self.on_stream_end(reason),
            BackendEvent::Error(message) => {
                self.finish_turn();
                warn!(error = %message, "agent reported an error");
                self.store.update(|store| {
                    store.set_status(AgentStatus::Idle);
                    store.set_streaming(false);
                    store.push_notice(NoticeLevel::Error, message);
                });
            }
            other => debug!(event = ?other, "not an agent event; ignoring"),
        }
    }

    /// Sends a prompt and starts a turn.
    pub async fn submit(self: &Arc<Self>, prompt: &str) -> Result<SubmitOutcome, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::TornDown);
        }

        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(SubmitOutcome::Empty);
        }

        if self.store.read(|store| store.session().turn_active()) {
            debug!("turn already active; rejecting submit");
            return Ok(SubmitOutcome::Busy);
        }

        let controller = Arc::clone(self);
        let prompt = prompt.to_string();
        let attempt = self
            .send_guard
            .try_run(self.send_interval, move || async move {
                controller.start_turn(prompt).await
            })
            .await;

        match attempt {
            Attempt::Ran(result) => result,
            Attempt::Skipped(reason) => {
                debug!(?reason, "duplicate submit skipped");
                Ok(SubmitOutcome::Skipped(reason))
            }
        }
    }

    async fn start_turn(self: &Arc<Self>, prompt: String) -> Result<SubmitOutcome, SessionError> {
        let turbo = self.store.update(|store| {
            if store.session().turn_active() {
                return None;
            }

            store.append_message(MessageRole::User, prompt.clone());
            store.set_status(AgentStatus::Thinking);
            store.set_streaming(true);
            Some(store.session().mode().is_turbo())
        });
        let Some(turbo) = turbo else {
            return Ok(SubmitOutcome::Busy);
        };

        *lock_unpoisoned(&self.turn) = TurnState::default();
        self.arm_watchdog();
        info!(turbo, "agent turn started");

        match self.backend.start_agent_task(&prompt, turbo).await {
            Ok(()) => Ok(SubmitOutcome::Started),
            Err(error) => {
                self.watchdog.disarm();
                warn!(%error, "backend rejected start_agent_task");
                if self.is_alive() {
                    self.store.update(|store| {
                        store.set_status(AgentStatus::Error(error.message().to_string()));
                        store.set_streaming(false);
                        store.push_notice(
                            NoticeLevel::Error,
                            format!("Failed to start agent: {}", error.message()),
                        );
                    });
                }
                Err(SessionError::backend("start_agent_task", error))
            }
        }
    }

    /// Cancels the running turn. Local state resets immediately; events still
    /// in flight from the cancelled turn are drained. Returns false when no
    /// turn was active.
    pub async fn cancel(self: &Arc<Self>) -> Result<bool, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::TornDown);
        }

        if !self.store.read(|store| store.session().turn_active()) {
            return Ok(false);
        }

        self.watchdog.disarm();
        *lock_unpoisoned(&self.turn) = TurnState {
            draining_cancelled: true,
            approved: None,
        };
        self.store.update(|store| {
            store.set_status(AgentStatus::Idle);
            store.set_streaming(false);
            store.set_pending_tool(None);
        });
        info!("agent turn cancelled");

        if let Err(error) = self.backend.cancel_agent_task().await {
            warn!(%error, "backend rejected cancel_agent_task");
            self.notify(
                NoticeLevel::Error,
                format!("Failed to cancel agent: {}", error.message()),
            );
            return Err(SessionError::backend("cancel_agent_task", error));
        }

        Ok(true)
    }

    /// Approves the pending tool. Returns false when nothing is pending.
    pub async fn approve(self: &Arc<Self>) -> Result<bool, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::TornDown);
        }

        let pending = self.store.update(|store| {
            let pending = store.take_pending_tool()?;
            store.set_status(AgentStatus::Executing);
            Some(pending)
        });
        let Some(pending) = pending else {
            return Ok(false);
        };

        self.watchdog.disarm();
        info!(tool = %pending.name, "tool approved");
        lock_unpoisoned(&self.turn).approved = Some(ApprovedTool {
            tool: pending,
            approved_at: Instant::now(),
        });

        self.send_feedback(true).await.map(|()| true)
    }

    /// Denies the pending tool; the agent goes back to thinking. Returns false
    /// when nothing is pending.
    pub async fn deny(self: &Arc<Self>) -> Result<bool, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::TornDown);
        }

        let pending = self.store.update(|store| {
            let pending = store.take_pending_tool()?;
            store.set_status(AgentStatus::Thinking);
            store.record_tool_execution(ToolExecution::new(
                pending.name.clone(),
                pending.args.clone(),
                String::new(),
                false,
                None,
            ));
            Some(pending)
        });
        let Some(pending) = pending else {
            return Ok(false);
        };

        info!(tool = %pending.name, "tool denied");
        self.arm_watchdog();

        self.send_feedback(false).await.map(|()| true)
    }

    /// Revokes every subscription and the watchdog. Safe to call repeatedly.
    pub fn teardown(&self) -> usize {
        let revoked = self.channel.close();
        self.watchdog.disarm();
        *lock_unpoisoned(&self.turn) = TurnState::default();
        if revoked > 0 {
            info!(revoked, "agent session controller torn down");
        }
        revoked
    }

    async fn send_feedback(self: &Arc<Self>, approved: bool) -> Result<(), SessionError> {
        let Err(error) = self.backend.send_user_feedback(approved).await else {
            return Ok(());
        };

        warn!(%error, approved, "backend rejected send_user_feedback");
        self.watchdog.disarm();
        lock_unpoisoned(&self.turn).approved = None;
        if self.is_alive() {
            self.store.update(|store| {
                store.set_status(AgentStatus::Error(error.message().to_string()));
                store.set_streaming(false);
                store.push_notice(
                    NoticeLevel::Error,
                    format!("Failed to send approval: {}", error.message()),
                );
            });
        }
        Err(SessionError::backend("send_user_feedback", error))
    }

    fn on_status(self: &Arc<Self>, raw: &str) {
        let Some(signal) = StatusSignal::classify(raw) else {
            debug!(status = raw, "unrecognized agent status; ignoring");
            return;
        };

        match signal {
            StatusSignal::Idle | StatusSignal::Halted => {
                self.finish_turn();
                let halted = signal == StatusSignal::Halted;
                self.store.update(|store| {
                    store.set_status(AgentStatus::Idle);
                    store.set_streaming(false);
                    if halted {
                        store.set_pending_tool(None);
                    }
                });
            }
            StatusSignal::Thinking => {
                self.store
                    .update(|store| store.set_status(AgentStatus::Thinking));
                self.arm_watchdog();
            }
            StatusSignal::Executing => {
                self.watchdog.disarm();
                self.store
                    .update(|store| store.set_status(AgentStatus::Executing));
            }
        }
    }

    fn on_tool_result(&self, tool: String, parameters: Value, result: String) {
        self.watchdog.disarm();

        let approved = lock_unpoisoned(&self.turn).approved.take();
        let duration_ms = approved.as_ref().map(|approved| {
            u64::try_from(approved.approved_at.elapsed().as_millis()).unwrap_or(u64::MAX)
        });
        let args = approved.map_or_else(|| parameters.clone(), |approved| approved.tool.args);
        let execution = ToolExecution::new(tool.clone(), args, result.clone(), true, duration_ms);

        self.store.update(|store| {
            store.append_tool_message(
                ToolInvocation {
                    name: tool,
                    parameters,
                },
                result,
            );
            store.set_streaming(false);
            store.record_tool_execution(execution);
        });
    }

    fn on_stream_end(&self, reason: StreamEndReason) {
        self.finish_turn();
        debug!(?reason, "agent stream ended");

        self.store.update(|store| {
            store.set_status(AgentStatus::Idle);
            store.set_streaming(false);
            match &reason {
                StreamEndReason::Denied => store.set_pending_tool(None),
                StreamEndReason::MaxSteps => store.push_notice(
                    NoticeLevel::Warning,
                    "Agent stopped after reaching the maximum number of steps",
                ),
                StreamEndReason::Complete | StreamEndReason::Other(_) => {}
            }
        });
    }

    fn on_file_access(self: &Arc<Self>, action: &str, path: String) {
        let Some(action) = FileAccessAction::parse(action) else {
            debug!(action, "unknown file access action; ignoring");
            return;
        };
        if path.trim().is_empty() {
            debug!("file access without a path; ignoring");
            return;
        }

        let needs_load = self.store.update(|store| {
            let editor = store.editor_mut();
            let index = editor.open_file(&path, FileSource::Agent);
            let file = &editor.files()[index];
            match action {
                FileAccessAction::Read => file.content().is_none(),
                FileAccessAction::Write => !file.is_modified(),
            }
        });

        if needs_load {
            self.spawn_file_load(path);
        }
    }

    fn spawn_file_load(&self, path: String) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%path, "no async runtime; agent file stays unloaded");
            return;
        };

        let store = self.store.clone();
        let backend = Arc::clone(&self.backend);
        let lifecycle = self.channel.lifecycle();
        runtime.spawn(async move {
            if !lifecycle.is_alive() {
                return;
            }
            if let Err(error) = load_file_into_store(&store, backend.as_ref(), &path, false).await
            {
                warn!(%path, %error, "failed to load file touched by the agent");
            }
        });
    }

    fn on_inactivity(&self, generation: u64) {
        if !self.is_alive() || !self.watchdog.claim(generation) {
            return;
        }

        warn!("no agent activity within the inactivity window; forcing idle");
        self.store.update(|store| {
            store.set_status(AgentStatus::Idle);
            store.set_streaming(false);
        });
    }

    fn arm_watchdog(self: &Arc<Self>) {
        let controller = Arc::downgrade(self);
        self.watchdog.arm(move |generation| {
            if let Some(controller) = controller.upgrade() {
                controller.on_inactivity(generation);
            }
        });
    }

    fn finish_turn(&self) {
        self.watchdog.disarm();
        let mut turn = lock_unpoisoned(&self.turn);
        if turn.draining_cancelled {
            debug!("cancelled turn drained");
        }
        *turn = TurnState::default();
    }

    fn is_draining(&self) -> bool {
        lock_unpoisoned(&self.turn).draining_cancelled
    }

    fn notify(&self, level: NoticeLevel, message: String) {
        if self.is_alive() {
            self.store.update(|store| store.push_notice(level, message));
        }
    }
}

/// Events that still apply while a cancelled turn is being drained.
fn drain_passes(event: &BackendEvent) -> bool {
    match event {
        BackendEvent::StreamEnd(_) | BackendEvent::Error(_) | BackendEvent::FileAccess { .. } => {
            true
        }
        BackendEvent::Streaming(streaming) => !streaming,
        BackendEvent::Status(raw) => {
            StatusSignal::classify(raw).is_some_and(StatusSignal::ends_turn)
        }
        _ => false,
    }
}
