//! Client-side session core for an agentic coding IDE.
//!
//! Invariant: single writer path. Every state change goes through
//! [`StoreHandle::update`], and every backend event reaches the store through
//! an [`EventChannel`] subscription guarded by its owner's lifecycle token.
//!
//! # Public API Overview
//! - Bootstrap everything with [`IdeSession`], or wire the parts by hand.
//! - Drive agent turns with [`SessionController`] (`submit`, `cancel`, `approve`, `deny`).
//! - Switch inference location with [`ConnectionSwitch`].
//! - Open and save editor files with [`EditorWorkspace`]; browse saved chats with
//!   [`ConversationHistory`]; check for updates with [`UpdateChecker`].
//! - Observe state through [`StoreHandle::read`], [`StoreHandle::snapshot`] and
//!   [`StoreHandle::subscribe`].
//! - The library only emits `tracing` events. Hosts without a subscriber of their
//!   own can call [`logging::init_tracing`] with [`SessionConfig::log_filter`].

pub mod channel;
pub mod config;
pub mod connection;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod history;
pub mod logging;
pub mod session;
pub mod store;
pub mod updates;
pub mod workspace;

mod watchdog;

pub use crate::channel::{EventChannel, LifecycleToken, Subscription};
pub use crate::config::SessionConfig;
pub use crate::connection::{ConnectionSwitch, DownloadStep, SharedPrefs, SwitchPhase};
pub use crate::controller::{SessionController, SubmitOutcome};
pub use crate::dedup::{Attempt, DedupGuard, SkipReason};
pub use crate::error::SessionError;
pub use crate::history::ConversationHistory;
pub use crate::session::IdeSession;
pub use crate::store::{
    AgentPhase, AgentStatus, AuditLog, ConnectionState, EditorFile, EditorState, FileSource,
    Message, MessageRole, Notice, NoticeLevel, PendingTool, SessionMode, SessionStore, SetupStatus,
    StoreHandle, ToolExecution, ToolInvocation, UpdateStatus,
};
pub use crate::updates::UpdateChecker;
pub use crate::workspace::EditorWorkspace;

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
