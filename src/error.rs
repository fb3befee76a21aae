use agent_bridge::BackendError;
use prefs_store::PrefsStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("backend call {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("session component has been torn down")]
    TornDown,

    #[error("a conversation cannot be loaded while an agent turn is active")]
    TurnActive,

    #[error("no open editor file at index {0}")]
    NoSuchFile(usize),

    #[error("preferences are not configured for this session")]
    PrefsUnavailable,

    #[error(transparent)]
    Prefs(#[from] PrefsStoreError),
}

impl SessionError {
    #[must_use]
    pub fn backend(operation: &'static str, source: BackendError) -> Self {
        Self::Backend { operation, source }
    }

    /// Backend message for [`SessionError::Backend`], if that is what this is.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Backend { source, .. } => Some(source.message()),
            _ => None,
        }
    }
}
