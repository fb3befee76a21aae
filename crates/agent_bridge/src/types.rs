use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inference location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Cloud,
    Offline,
}

impl ConnectionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(Self::Cloud),
            "offline" => Ok(Self::Offline),
            other => Err(format!("Invalid mode: {other}")),
        }
    }
}

/// Hardware capability detection result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    #[serde(alias = "type")]
    pub gpu_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_mb: Option<u64>,
}

impl GpuInfo {
    /// Descriptor used when no accelerator is detected or detection fails.
    #[must_use]
    pub fn cpu_fallback() -> Self {
        Self {
            gpu_type: "cpu".to_string(),
            name: "CPU Only".to_string(),
            vram_mb: None,
        }
    }
}

/// Local asset presence required for offline mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCheck {
    pub binaries_ok: bool,
    pub model_ok: bool,
}

impl SetupCheck {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.binaries_ok && self.model_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Downloading,
    Paused,
    Resuming,
    Completed,
    Error,
}

/// Payload of `download-progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub step: String,
    pub percent: f64,
    #[serde(default)]
    pub speed_mbps: f64,
    #[serde(default)]
    pub eta_seconds: u64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    pub state: DownloadState,
}

impl DownloadProgress {
    /// Progress record for a step that has not reported any bytes yet.
    #[must_use]
    pub fn starting(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            percent: 0.0,
            speed_mbps: 0.0,
            eta_seconds: 0,
            downloaded_bytes: 0,
            total_bytes: 0,
            state: DownloadState::Downloading,
        }
    }
}

/// Outcome carried by `model-load-complete`.
///
/// The backend sends `true` after loading a local model and `"unloaded"` after
/// switching back to cloud inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLoadOutcome {
    Loaded,
    Unloaded,
}

/// Conversation list entry (no messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: usize,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
}

/// Full saved conversation returned by `load_conversation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: String,
    pub updated_at: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub version: String,
    pub current_version: String,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub download_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProgress {
    pub downloaded: u64,
    pub total: u64,
    pub percent: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}
