use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Callback invoked on the host's dispatch turn with the raw event payload.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// One-shot revocation returned by a successful [`EventTransport::listen`].
pub type Unlisten = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The host publish/subscribe bridge is not present (e.g. running headless).
    #[error("event transport is unavailable: {0}")]
    Unavailable(String),

    #[error("event transport rejected '{event}': {message}")]
    Rejected { event: String, message: String },
}

/// Host publish/subscribe bridge.
///
/// Events of the same name are delivered in emission order; there is no
/// ordering guarantee across different names.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Registers `handler` for `event`. Registration completes asynchronously;
    /// events emitted before it resolves may be missed.
    async fn listen(&self, event: &str, handler: EventHandler) -> Result<Unlisten, TransportError>;

    /// Emits a client-to-backend signal.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;
}
