use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agent_bridge::{
    names, AgentBackend, BackendError, ConnectionMode, Conversation, ConversationMeta, GpuInfo,
    SetupCheck, UpdateInfo,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::lock_unpoisoned;
use crate::transport::MockTransport;

/// One recorded backend call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    StartAgentTask { task: String, is_turbo: bool },
    CancelAgentTask,
    SendUserFeedback { approved: bool },
    ReadWorkspaceFile { path: String },
    SaveWorkspaceFile { path: String, content: String },
    ListConversations,
    LoadConversation { id: String },
    DeleteConversation { id: String },
    DetectGpu,
    CheckSetupStatus,
    DownloadBinaries { gpu_type: String },
    DownloadModel,
    SetConnectionMode { mode: ConnectionMode },
    PauseDownload,
    ResumeDownload,
    CancelDownload,
    CheckForUpdates,
    DownloadUpdate,
    InstallUpdate,
}

/// Argument-free discriminant of [`BackendCall`] used for failure injection and gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    StartAgentTask,
    CancelAgentTask,
    SendUserFeedback,
    ReadWorkspaceFile,
    SaveWorkspaceFile,
    ListConversations,
    LoadConversation,
    DeleteConversation,
    DetectGpu,
    CheckSetupStatus,
    DownloadBinaries,
    DownloadModel,
    SetConnectionMode,
    PauseDownload,
    ResumeDownload,
    CancelDownload,
    CheckForUpdates,
    DownloadUpdate,
    InstallUpdate,
}

impl BackendCall {
    #[must_use]
    pub fn kind(&self) -> CallKind {
        match self {
            Self::StartAgentTask { .. } => CallKind::StartAgentTask,
            Self::CancelAgentTask => CallKind::CancelAgentTask,
            Self::SendUserFeedback { .. } => CallKind::SendUserFeedback,
            Self::ReadWorkspaceFile { .. } => CallKind::ReadWorkspaceFile,
            Self::SaveWorkspaceFile { .. } => CallKind::SaveWorkspaceFile,
            Self::ListConversations => CallKind::ListConversations,
            Self::LoadConversation { .. } => CallKind::LoadConversation,
            Self::DeleteConversation { .. } => CallKind::DeleteConversation,
            Self::DetectGpu => CallKind::DetectGpu,
            Self::CheckSetupStatus => CallKind::CheckSetupStatus,
            Self::DownloadBinaries { .. } => CallKind::DownloadBinaries,
            Self::DownloadModel => CallKind::DownloadModel,
            Self::SetConnectionMode { .. } => CallKind::SetConnectionMode,
            Self::PauseDownload => CallKind::PauseDownload,
            Self::ResumeDownload => CallKind::ResumeDownload,
            Self::CancelDownload => CallKind::CancelDownload,
            Self::CheckForUpdates => CallKind::CheckForUpdates,
            Self::DownloadUpdate => CallKind::DownloadUpdate,
            Self::InstallUpdate => CallKind::InstallUpdate,
        }
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    once: Vec<String>,
    always: Option<String>,
}

struct BackendState {
    calls: Vec<BackendCall>,
    failures: HashMap<CallKind, FailurePlan>,
    gates: HashMap<CallKind, watch::Sender<bool>>,
    setup: SetupCheck,
    gpu: GpuInfo,
    files: HashMap<String, String>,
    conversations: Vec<Conversation>,
    update: Option<UpdateInfo>,
    downloaded_bytes: u64,
}

/// Recording backend with canned data, failure injection and call gates.
///
/// When a [`MockTransport`] is attached, mode switches and completed downloads
/// emit the same follow-up events the native backend sends.
pub struct MockBackend {
    state: Mutex<BackendState>,
    events: Option<Arc<MockTransport>>,
    instant_model_load: bool,
    announce_mode_change: bool,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                calls: Vec::new(),
                failures: HashMap::new(),
                gates: HashMap::new(),
                setup: SetupCheck {
                    binaries_ok: true,
                    model_ok: true,
                },
                gpu: GpuInfo {
                    gpu_type: "nvidia".to_string(),
                    name: "NVIDIA GeForce RTX 4070".to_string(),
                    vram_mb: Some(12288),
                },
                files: HashMap::new(),
                conversations: Vec::new(),
                update: None,
                downloaded_bytes: 0,
            }),
            events: None,
            instant_model_load: false,
            announce_mode_change: true,
        }
    }

    /// Emits follow-up backend events through `transport`.
    #[must_use]
    pub fn with_events(mut self, transport: Arc<MockTransport>) -> Self {
        self.events = Some(transport);
        self
    }

    /// Offline switches emit `model-load-progress 100` and `model-load-complete` immediately.
    #[must_use]
    pub fn with_instant_model_load(mut self) -> Self {
        self.instant_model_load = true;
        self
    }

    /// Mode switches stop emitting `connection-mode-changed`, leaving the
    /// model load events as the only follow-up.
    #[must_use]
    pub fn without_mode_change_event(mut self) -> Self {
        self.announce_mode_change = false;
        self
    }

    #[must_use]
    pub fn with_setup_status(self, binaries_ok: bool, model_ok: bool) -> Self {
        lock_unpoisoned(&self.state).setup = SetupCheck {
            binaries_ok,
            model_ok,
        };
        self
    }

    #[must_use]
    pub fn with_gpu(self, gpu: GpuInfo) -> Self {
        lock_unpoisoned(&self.state).gpu = gpu;
        self
    }

    #[must_use]
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        lock_unpoisoned(&self.state)
            .files
            .insert(path.into(), content.into());
        self
    }

    #[must_use]
    pub fn with_conversation(self, conversation: Conversation) -> Self {
        lock_unpoisoned(&self.state).conversations.push(conversation);
        self
    }

    #[must_use]
    pub fn with_update(self, update: UpdateInfo) -> Self {
        lock_unpoisoned(&self.state).update = Some(update);
        self
    }

    /// Every subsequent call of `kind` fails with `message`.
    pub fn fail(&self, kind: CallKind, message: impl Into<String>) {
        lock_unpoisoned(&self.state)
            .failures
            .entry(kind)
            .or_default()
            .always = Some(message.into());
    }

    /// The next call of `kind` fails with `message`; queued failures apply in order.
    pub fn fail_once(&self, kind: CallKind, message: impl Into<String>) {
        lock_unpoisoned(&self.state)
            .failures
            .entry(kind)
            .or_default()
            .once
            .push(message.into());
    }

    pub fn clear_failures(&self, kind: CallKind) {
        lock_unpoisoned(&self.state).failures.remove(&kind);
    }

    /// Calls of `kind` are recorded but stay pending until [`Self::release`].
    pub fn hold(&self, kind: CallKind) {
        let (gate, _) = watch::channel(false);
        lock_unpoisoned(&self.state).gates.insert(kind, gate);
    }

    pub fn release(&self, kind: CallKind) {
        if let Some(gate) = lock_unpoisoned(&self.state).gates.remove(&kind) {
            gate.send_replace(true);
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        lock_unpoisoned(&self.state).calls.clone()
    }

    #[must_use]
    pub fn call_count(&self, kind: CallKind) -> usize {
        lock_unpoisoned(&self.state)
            .calls
            .iter()
            .filter(|call| call.kind() == kind)
            .count()
    }

    #[must_use]
    pub fn setup_status(&self) -> SetupCheck {
        lock_unpoisoned(&self.state).setup
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        lock_unpoisoned(&self.state).files.get(path).cloned()
    }

    async fn enter(&self, call: BackendCall) -> Result<(), BackendError> {
        let kind = call.kind();
        let gate = {
            let mut state = lock_unpoisoned(&self.state);
            state.calls.push(call);
            state.gates.get(&kind).map(watch::Sender::subscribe)
        };

        if let Some(mut opened) = gate {
            let _ = opened.wait_for(|open| *open).await;
        }

        let mut state = lock_unpoisoned(&self.state);
        let Some(plan) = state.failures.get_mut(&kind) else {
            return Ok(());
        };

        if !plan.once.is_empty() {
            return Err(BackendError::new(plan.once.remove(0)));
        }

        match &plan.always {
            Some(message) => Err(BackendError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Some(events) = &self.events {
            events.emit_from_backend(event, payload);
        }
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn start_agent_task(&self, task: &str, is_turbo: bool) -> Result<(), BackendError> {
        self.enter(BackendCall::StartAgentTask {
            task: task.to_string(),
            is_turbo,
        })
        .await
    }

    async fn cancel_agent_task(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::CancelAgentTask).await
    }

    async fn send_user_feedback(&self, approved: bool) -> Result<(), BackendError> {
        self.enter(BackendCall::SendUserFeedback { approved }).await
    }

    async fn read_workspace_file(&self, path: &str) -> Result<String, BackendError> {
        self.enter(BackendCall::ReadWorkspaceFile {
            path: path.to_string(),
        })
        .await?;

        lock_unpoisoned(&self.state)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| BackendError::new(format!("Failed to read file: {path} not found")))
    }

    async fn save_workspace_file(&self, path: &str, content: &str) -> Result<(), BackendError> {
        self.enter(BackendCall::SaveWorkspaceFile {
            path: path.to_string(),
            content: content.to_string(),
        })
        .await?;

        lock_unpoisoned(&self.state)
            .files
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, BackendError> {
        self.enter(BackendCall::ListConversations).await?;

        let state = lock_unpoisoned(&self.state);
        let mut metas: Vec<ConversationMeta> = state
            .conversations
            .iter()
            .map(|conversation| ConversationMeta {
                id: conversation.id.clone(),
                title: conversation.title.clone(),
                created_at: conversation.created_at.clone(),
                updated_at: conversation.updated_at.clone(),
                message_count: conversation.messages.len(),
                mode: conversation.mode.clone(),
            })
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn load_conversation(&self, id: &str) -> Result<Conversation, BackendError> {
        self.enter(BackendCall::LoadConversation { id: id.to_string() })
            .await?;

        lock_unpoisoned(&self.state)
            .conversations
            .iter()
            .find(|conversation| conversation.id == id)
            .cloned()
            .ok_or_else(|| BackendError::new(format!("Conversation {id} not found")))
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), BackendError> {
        self.enter(BackendCall::DeleteConversation { id: id.to_string() })
            .await?;

        lock_unpoisoned(&self.state)
            .conversations
            .retain(|conversation| conversation.id != id);
        Ok(())
    }

    async fn detect_gpu(&self) -> Result<GpuInfo, BackendError> {
        self.enter(BackendCall::DetectGpu).await?;
        Ok(lock_unpoisoned(&self.state).gpu.clone())
    }

    async fn check_setup_status(&self) -> Result<SetupCheck, BackendError> {
        self.enter(BackendCall::CheckSetupStatus).await?;
        Ok(lock_unpoisoned(&self.state).setup)
    }

    async fn download_binaries(&self, gpu_type: &str) -> Result<(), BackendError> {
        self.enter(BackendCall::DownloadBinaries {
            gpu_type: gpu_type.to_string(),
        })
        .await?;

        lock_unpoisoned(&self.state).setup.binaries_ok = true;
        self.emit(
            names::DOWNLOAD_PROGRESS,
            json!({
                "step": "binaries",
                "percent": 100.0,
                "speed_mbps": 0.0,
                "eta_seconds": 0,
                "state": "completed"
            }),
        );
        Ok(())
    }

    async fn download_model(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::DownloadModel).await?;

        lock_unpoisoned(&self.state).setup.model_ok = true;
        self.emit(
            names::DOWNLOAD_PROGRESS,
            json!({
                "step": "model",
                "percent": 100.0,
                "speed_mbps": 0.0,
                "eta_seconds": 0,
                "state": "completed"
            }),
        );
        self.emit(names::SETUP_COMPLETE, Value::Null);
        Ok(())
    }

    async fn set_connection_mode(&self, mode: ConnectionMode) -> Result<(), BackendError> {
        self.enter(BackendCall::SetConnectionMode { mode }).await?;

        match mode {
            ConnectionMode::Offline => {
                if !lock_unpoisoned(&self.state).setup.is_complete() {
                    return Err(BackendError::new(
                        "Setup not complete. Please download binaries and model first.",
                    ));
                }

                self.emit(names::MODEL_LOAD_PROGRESS, json!(5));
                if self.instant_model_load {
                    self.emit(names::MODEL_LOAD_PROGRESS, json!(100));
                    self.emit(names::MODEL_LOAD_COMPLETE, json!(true));
                }
            }
            ConnectionMode::Cloud => {
                self.emit(names::MODEL_LOAD_PROGRESS, json!(0));
                self.emit(names::MODEL_LOAD_COMPLETE, json!("unloaded"));
            }
        }
        if self.announce_mode_change {
            self.emit(names::CONNECTION_MODE_CHANGED, json!(mode.as_str()));
        }

        Ok(())
    }

    async fn pause_download(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::PauseDownload).await
    }

    async fn resume_download(&self) -> Result<u64, BackendError> {
        self.enter(BackendCall::ResumeDownload).await?;
        Ok(lock_unpoisoned(&self.state).downloaded_bytes)
    }

    async fn cancel_download(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::CancelDownload).await
    }

    async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, BackendError> {
        self.enter(BackendCall::CheckForUpdates).await?;
        Ok(lock_unpoisoned(&self.state).update.clone())
    }

    async fn download_update(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::DownloadUpdate).await
    }

    async fn install_update(&self) -> Result<(), BackendError> {
        self.enter(BackendCall::InstallUpdate).await
    }
}
