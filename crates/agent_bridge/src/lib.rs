//! Typed contract between the IDE session core and the native backend process.
//!
//! The backend is reachable only through two asynchronous surfaces:
//!
//! - request/response calls ([`AgentBackend`]), one method per backend command;
//! - a named-event channel ([`EventTransport`]) carrying fire-and-forget JSON
//!   payloads that [`BackendEvent::decode`] turns into typed events.
//!
//! This crate intentionally defines only wire shapes and the two seams. It
//! excludes state reconciliation, timers and any host/platform transport code.

mod backend;
mod events;
mod transport;
mod types;

pub use backend::{AgentBackend, BackendError};
pub use events::{
    names, BackendEvent, EventDecodeError, FileAccessAction, StatusSignal, StreamEndReason,
    AGENT_EVENTS, SETUP_EVENTS, UPDATE_EVENTS,
};
pub use transport::{EventHandler, EventTransport, TransportError, Unlisten};
pub use types::{
    ConnectionMode, Conversation, ConversationMeta, DownloadProgress, DownloadState, GpuInfo,
    ModelLoadOutcome, SetupCheck, StoredMessage, UpdateError, UpdateInfo, UpdateProgress,
};
