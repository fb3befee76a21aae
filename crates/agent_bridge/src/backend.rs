use std::fmt;

use async_trait::async_trait;

use crate::types::{
    ConnectionMode, Conversation, ConversationMeta, GpuInfo, SetupCheck, UpdateInfo,
};

/// Error returned by a rejected backend call.
///
/// The backend reports failures as plain strings, so this carries only the
/// message; callers classify it (for example network-related) by inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    /// Creates a new backend error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for BackendError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Request/response surface of the native backend.
///
/// Every call may suspend; none of them are retried by the contract itself.
#[async_trait]
pub trait AgentBackend: Send + Sync + 'static {
    /// Starts one agent turn. `is_turbo` enables tool execution with approval gates.
    async fn start_agent_task(&self, task: &str, is_turbo: bool) -> Result<(), BackendError>;

    async fn cancel_agent_task(&self) -> Result<(), BackendError>;

    /// Answers the outstanding tool-approval request.
    async fn send_user_feedback(&self, approved: bool) -> Result<(), BackendError>;

    async fn read_workspace_file(&self, path: &str) -> Result<String, BackendError>;

    async fn save_workspace_file(&self, path: &str, content: &str) -> Result<(), BackendError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError>;

    async fn load_conversation(&self, id: &str) -> Result<Conversation, BackendError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), BackendError>;

    async fn detect_gpu(&self) -> Result<GpuInfo, BackendError>;

    async fn check_setup_status(&self) -> Result<SetupCheck, BackendError>;

    /// Downloads GPU-specific inference binaries. Resolves when the step ends,
    /// including when it ends because the download was paused or cancelled.
    async fn download_binaries(&self, gpu_type: &str) -> Result<(), BackendError>;

    async fn download_model(&self) -> Result<(), BackendError>;

    /// Switches inference mode; model load/unload progress arrives as events.
    async fn set_connection_mode(&self, mode: ConnectionMode) -> Result<(), BackendError>;

    async fn pause_download(&self) -> Result<(), BackendError>;

    /// Resumes a paused download and returns the bytes already on disk.
    async fn resume_download(&self) -> Result<u64, BackendError>;

    async fn cancel_download(&self) -> Result<(), BackendError>;

    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, BackendError>;

    async fn download_update(&self) -> Result<(), BackendError>;

    async fn install_update(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::BackendError;

    #[test]
    fn backend_error_preserves_message() {
        let error = BackendError::new("Workspace not initialized");
        assert_eq!(error.message(), "Workspace not initialized");
        assert_eq!(error.to_string(), "Workspace not initialized");
    }

    #[test]
    fn backend_error_converts_from_strings() {
        let owned: BackendError = String::from("Download paused").into();
        let borrowed: BackendError = "Download paused".into();
        assert_eq!(owned, borrowed);
    }
}
