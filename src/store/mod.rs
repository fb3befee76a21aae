//! Session state store: the single source of truth for everything the UI renders.
//!
//! Every mutation is a method on [`SessionStore`] and is reached through
//! [`StoreHandle::update`], so each call is one indivisible transition for
//! observers.

mod audit;
mod connection;
mod editor;
mod notices;
mod session;
mod updates;

use std::sync::{Arc, Mutex};

use agent_bridge::ConversationMeta;
use tokio::sync::watch;

pub use audit::{AuditLog, ToolExecution};
pub use connection::{ConnectionState, SetupStatus};
pub use editor::{display_name, language_for_path, EditorFile, EditorState, FileSource};
pub use notices::{Notice, NoticeLevel};
pub use session::{
    AgentPhase, AgentStatus, Message, MessageRole, PendingTool, Session, SessionMode,
    ToolInvocation,
};
pub use updates::UpdateStatus;

use crate::config::{DEFAULT_AUDIT_CAPACITY, DEFAULT_NOTICE_CAPACITY};
use crate::lock_unpoisoned;
use notices::NoticeQueue;
use session::estimate_tokens;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStore {
    session: Session,
    editor: EditorState,
    connection: ConnectionState,
    audit: AuditLog,
    notices: NoticeQueue,
    conversations: Vec<ConversationMeta>,
    update_status: UpdateStatus,
    backend_ready: bool,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY, DEFAULT_NOTICE_CAPACITY)
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(audit_capacity: usize, notice_capacity: usize) -> Self {
        Self {
            session: Session::default(),
            editor: EditorState::default(),
            connection: ConnectionState::default(),
            audit: AuditLog::new(audit_capacity),
            notices: NoticeQueue::new(notice_capacity),
            conversations: Vec::new(),
            update_status: UpdateStatus::Idle,
            backend_ready: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn editor(&self) -> &EditorState {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut EditorState {
        &mut self.editor
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionState {
        &mut self.connection
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    #[must_use]
    pub fn conversations(&self) -> &[ConversationMeta] {
        &self.conversations
    }

    #[must_use]
    pub fn update_status(&self) -> &UpdateStatus {
        &self.update_status
    }

    #[must_use]
    pub fn backend_ready(&self) -> bool {
        self.backend_ready
    }

    pub fn set_mode(&mut self, mode: SessionMode) {
        self.session.mode = mode;
    }

    pub fn append_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.session.messages.push(Message::new(role, content));
    }

    pub fn append_tool_message(&mut self, tool: ToolInvocation, result: impl Into<String>) {
        self.session
            .messages
            .push(Message::tool_result(tool, result));
    }

    /// Replaces the content of a trailing model message, or starts a new one.
    pub fn update_streaming_tail(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.session.token_count = estimate_tokens(&content);

        if let Some(last) = self.session.messages.last_mut() {
            if last.role() == MessageRole::Model {
                last.replace_content(content);
                return;
            }
        }

        self.session
            .messages
            .push(Message::new(MessageRole::Model, content));
    }

    /// Idle also clears turn-scoped scratch state.
    pub fn set_status(&mut self, status: AgentStatus) {
        if status == AgentStatus::Idle {
            self.session.thinking_text.clear();
            self.session.token_count = 0;
        }
        self.session.status = status;
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.session.is_streaming = streaming;
    }

    pub fn set_thinking_text(&mut self, text: impl Into<String>) {
        self.session.thinking_text = text.into();
    }

    /// Last write wins; there is no queue of approvals.
    pub fn set_pending_tool(&mut self, tool: Option<PendingTool>) {
        self.session.pending_tool = tool;
    }

    pub fn take_pending_tool(&mut self) -> Option<PendingTool> {
        self.session.pending_tool.take()
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.session.messages = messages;
    }

    pub fn record_tool_execution(&mut self, execution: ToolExecution) {
        self.audit.push(execution);
    }

    pub fn push_notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    /// Hands queued notices to the UI, oldest first.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    pub fn set_conversations(&mut self, conversations: Vec<ConversationMeta>) {
        self.conversations = conversations;
    }

    pub fn set_update_status(&mut self, status: UpdateStatus) {
        self.update_status = status;
    }

    pub fn set_backend_ready(&mut self, ready: bool) {
        self.backend_ready = ready;
    }
}

/// Shared handle to the one [`SessionStore`] of a session.
///
/// Each `update` runs under the store lock and bumps a revision counter that
/// observers can await through [`StoreHandle::subscribe`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<SessionStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(SessionStore::default())
    }
}

impl StoreHandle {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(store)),
            revision: Arc::new(revision),
        }
    }

    pub fn update<R>(&self, mutate: impl FnOnce(&mut SessionStore) -> R) -> R {
        let result = {
            let mut store = lock_unpoisoned(&self.inner);
            mutate(&mut store)
        };
        self.revision.send_modify(|revision| *revision += 1);
        result
    }

    pub fn read<R>(&self, inspect: impl FnOnce(&SessionStore) -> R) -> R {
        let store = lock_unpoisoned(&self.inner);
        inspect(&store)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionStore {
        self.read(SessionStore::clone)
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
