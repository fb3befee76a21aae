use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    ConnectionMode, DownloadProgress, ModelLoadOutcome, UpdateError, UpdateProgress,
};

/// Wire names of backend events and client signals.
pub mod names {
    pub const AGENT_THINKING: &str = "agent-thinking";
    pub const AGENT_STREAM_CHUNK: &str = "agent-stream-chunk";
    pub const AGENT_STREAMING: &str = "agent-streaming";
    pub const AGENT_STATUS: &str = "agent-status";
    pub const AGENT_TOOL_RESULT: &str = "agent-tool-result";
    pub const AGENT_APPROVAL_REQUEST: &str = "agent-approval-request";
    pub const AGENT_FILE_ACCESS: &str = "agent-file-access";
    pub const AGENT_MESSAGE_COMPLETE: &str = "agent-message-complete";
    pub const AGENT_STREAM_END: &str = "agent-stream-end";
    pub const AGENT_ERROR: &str = "agent-error";
    pub const MODEL_LOAD_PROGRESS: &str = "model-load-progress";
    pub const MODEL_LOAD_COMPLETE: &str = "model-load-complete";
    pub const MODEL_LOAD_ERROR: &str = "model-load-error";
    pub const DOWNLOAD_PROGRESS: &str = "download-progress";
    pub const SETUP_COMPLETE: &str = "setup-complete";
    pub const CONNECTION_MODE_CHANGED: &str = "connection-mode-changed";
    pub const UPDATE_DOWNLOAD_PROGRESS: &str = "update-download-progress";
    pub const UPDATE_ERROR: &str = "update-error";
    pub const APP_READY: &str = "app-ready";

    /// One-shot client signal telling the backend it may start emitting.
    pub const FRONTEND_LOADED: &str = "frontend_loaded";
}

/// Events reconciled by the agent session controller.
pub const AGENT_EVENTS: &[&str] = &[
    names::AGENT_THINKING,
    names::AGENT_STREAM_CHUNK,
    names::AGENT_STREAMING,
    names::AGENT_STATUS,
    names::AGENT_TOOL_RESULT,
    names::AGENT_APPROVAL_REQUEST,
    names::AGENT_FILE_ACCESS,
    names::AGENT_MESSAGE_COMPLETE,
    names::AGENT_STREAM_END,
    names::AGENT_ERROR,
];

/// Events reconciled by the connection/setup mode switch.
pub const SETUP_EVENTS: &[&str] = &[
    names::MODEL_LOAD_PROGRESS,
    names::MODEL_LOAD_COMPLETE,
    names::MODEL_LOAD_ERROR,
    names::DOWNLOAD_PROGRESS,
    names::SETUP_COMPLETE,
    names::CONNECTION_MODE_CHANGED,
    names::APP_READY,
];

pub const UPDATE_EVENTS: &[&str] = &[names::UPDATE_DOWNLOAD_PROGRESS, names::UPDATE_ERROR];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDecodeError {
    #[error("unknown backend event '{0}'")]
    UnknownEvent(String),

    #[error("malformed payload for '{event}': {message}")]
    MalformedPayload { event: String, message: String },
}

/// Typed backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Thinking(String),
    /// Full accumulated reply text so far, not a delta.
    StreamChunk(String),
    Streaming(bool),
    /// Raw status string; see [`StatusSignal::classify`].
    Status(String),
    ToolResult {
        tool: String,
        parameters: Value,
        result: String,
    },
    ApprovalRequest {
        tool: String,
        parameters: Value,
    },
    FileAccess {
        action: String,
        path: String,
    },
    MessageComplete {
        content: String,
    },
    StreamEnd(StreamEndReason),
    Error(String),
    ModelLoadProgress(u8),
    ModelLoadComplete(ModelLoadOutcome),
    ModelLoadError(String),
    DownloadProgress(DownloadProgress),
    SetupComplete,
    ConnectionModeChanged(ConnectionMode),
    UpdateProgress(UpdateProgress),
    UpdateFailed(UpdateError),
    AppReady,
}

#[derive(Deserialize)]
struct ToolResultPayload {
    tool: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct ApprovalRequestPayload {
    tool: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Deserialize)]
struct FileAccessPayload {
    action: String,
    path: String,
}

#[derive(Deserialize)]
struct MessageCompletePayload {
    content: String,
}

impl BackendEvent {
    /// Decodes a raw event by wire name.
    ///
    /// Text events tolerate non-string payloads by rendering them as raw JSON
    /// text; structured events reject payloads missing required fields.
    pub fn decode(event: &str, payload: Value) -> Result<Self, EventDecodeError> {
        let decoded = match event {
            names::AGENT_THINKING => Self::Thinking(value_as_text(payload)),
            names::AGENT_STREAM_CHUNK => Self::StreamChunk(value_as_text(payload)),
            names::AGENT_STREAMING => match payload {
                Value::Bool(flag) => Self::Streaming(flag),
                other => return Err(malformed(event, format!("expected bool, got {other}"))),
            },
            names::AGENT_STATUS => Self::Status(value_as_text(payload)),
            names::AGENT_TOOL_RESULT => {
                let parsed: ToolResultPayload = parse_struct(event, payload)?;
                Self::ToolResult {
                    tool: parsed.tool,
                    parameters: parsed.parameters,
                    result: value_as_text(parsed.result),
                }
            }
            names::AGENT_APPROVAL_REQUEST => {
                let parsed: ApprovalRequestPayload = parse_struct(event, payload)?;
                Self::ApprovalRequest {
                    tool: parsed.tool,
                    parameters: parsed.parameters,
                }
            }
            names::AGENT_FILE_ACCESS => {
                let parsed: FileAccessPayload = parse_struct(event, payload)?;
                Self::FileAccess {
                    action: parsed.action,
                    path: parsed.path,
                }
            }
            names::AGENT_MESSAGE_COMPLETE => {
                let parsed: MessageCompletePayload = parse_struct(event, payload)?;
                Self::MessageComplete {
                    content: parsed.content,
                }
            }
            names::AGENT_STREAM_END => {
                Self::StreamEnd(StreamEndReason::parse(&value_as_text(payload)))
            }
            names::AGENT_ERROR => Self::Error(value_as_text(payload)),
            names::MODEL_LOAD_PROGRESS => match payload.as_f64() {
                Some(percent) => Self::ModelLoadProgress(clamp_percent(percent)),
                None => return Err(malformed(event, format!("expected number, got {payload}"))),
            },
            names::MODEL_LOAD_COMPLETE => Self::ModelLoadComplete(match payload {
                Value::Bool(false) => ModelLoadOutcome::Unloaded,
                Value::String(ref text) if text.eq_ignore_ascii_case("unloaded") => {
                    ModelLoadOutcome::Unloaded
                }
                _ => ModelLoadOutcome::Loaded,
            }),
            names::MODEL_LOAD_ERROR => Self::ModelLoadError(value_as_text(payload)),
            names::DOWNLOAD_PROGRESS => Self::DownloadProgress(parse_struct(event, payload)?),
            names::SETUP_COMPLETE => Self::SetupComplete,
            names::CONNECTION_MODE_CHANGED => {
                let mode = value_as_text(payload)
                    .parse::<ConnectionMode>()
                    .map_err(|message| malformed(event, message))?;
                Self::ConnectionModeChanged(mode)
            }
            names::UPDATE_DOWNLOAD_PROGRESS => Self::UpdateProgress(parse_struct(event, payload)?),
            names::UPDATE_ERROR => Self::UpdateFailed(parse_struct(event, payload)?),
            names::APP_READY => Self::AppReady,
            other => return Err(EventDecodeError::UnknownEvent(other.to_string())),
        };

        Ok(decoded)
    }

    /// Returns true when this event ends the current turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamEnd(_) | Self::Error(_))
    }
}

fn parse_struct<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, EventDecodeError> {
    serde_json::from_value(payload).map_err(|error| malformed(event, error.to_string()))
}

fn malformed(event: &str, message: impl Into<String>) -> EventDecodeError {
    EventDecodeError::MalformedPayload {
        event: event.to_string(),
        message: message.into(),
    }
}

fn value_as_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn clamp_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as u8
}

/// Client-side classification of free-form backend status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSignal {
    Idle,
    Thinking,
    Executing,
    /// The backend stopped the turn because it was cancelled or denied.
    Halted,
}

impl StatusSignal {
    /// Maps a status string to a signal, or `None` when it carries no transition.
    #[must_use]
    pub fn classify(raw: &str) -> Option<Self> {
        let status = raw.to_ascii_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|keyword| status.contains(keyword));

        if has(&["cancel", "denied"]) {
            Some(Self::Halted)
        } else if has(&["idle", "ready", "complete"]) {
            Some(Self::Idle)
        } else if has(&["executing"]) {
            Some(Self::Executing)
        } else if has(&["thinking"]) {
            Some(Self::Thinking)
        } else {
            None
        }
    }

    /// True for signals that leave the session idle.
    #[must_use]
    pub fn ends_turn(self) -> bool {
        matches!(self, Self::Idle | Self::Halted)
    }
}

/// Reason carried by `agent-stream-end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEndReason {
    Complete,
    Denied,
    MaxSteps,
    Other(String),
}

impl StreamEndReason {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "complete" | "" => Self::Complete,
            "denied" => Self::Denied,
            "max_steps" => Self::MaxSteps,
            _ => Self::Other(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccessAction {
    Read,
    Write,
}

impl FileAccessAction {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::types::DownloadState;

    #[test]
    fn text_events_render_non_string_payloads_as_raw_json() {
        let event = BackendEvent::decode(names::AGENT_STREAM_CHUNK, json!({"partial": 1}))
            .expect("chunk should decode");
        assert_eq!(event, BackendEvent::StreamChunk("{\"partial\":1}".to_string()));

        let event = BackendEvent::decode(names::AGENT_THINKING, Value::Null)
            .expect("thinking should decode");
        assert_eq!(event, BackendEvent::Thinking(String::new()));
    }

    #[test]
    fn tool_result_keeps_tool_and_result_separate() {
        let event = BackendEvent::decode(
            names::AGENT_TOOL_RESULT,
            json!({
                "tool": "read_file",
                "parameters": {"path": "src/main.rs"},
                "result": "fn main() {}"
            }),
        )
        .expect("tool result should decode");

        assert_eq!(
            event,
            BackendEvent::ToolResult {
                tool: "read_file".to_string(),
                parameters: json!({"path": "src/main.rs"}),
                result: "fn main() {}".to_string(),
            }
        );
    }

    #[test]
    fn approval_request_preserves_opaque_string_parameters() {
        let event = BackendEvent::decode(
            names::AGENT_APPROVAL_REQUEST,
            json!({"tool": "write_file", "parameters": "{not json"}),
        )
        .expect("approval request should decode");

        assert_matches!(
            event,
            BackendEvent::ApprovalRequest { tool, parameters }
                if tool == "write_file" && parameters == json!("{not json")
        );
    }

    #[test]
    fn structured_events_reject_missing_fields() {
        let error = BackendEvent::decode(names::AGENT_FILE_ACCESS, json!({"action": "read"}))
            .expect_err("missing path must fail");
        assert_matches!(
            error,
            EventDecodeError::MalformedPayload { event, .. } if event == names::AGENT_FILE_ACCESS
        );

        let error = BackendEvent::decode(names::AGENT_STREAMING, json!("yes"))
            .expect_err("non-bool streaming flag must fail");
        assert_matches!(error, EventDecodeError::MalformedPayload { .. });
    }

    #[test]
    fn unknown_event_names_are_rejected() {
        let error = BackendEvent::decode("context-summary", json!("..."))
            .expect_err("unknown event must fail");
        assert_eq!(error, EventDecodeError::UnknownEvent("context-summary".to_string()));
    }

    #[test]
    fn model_load_events_decode_progress_and_outcome() {
        assert_eq!(
            BackendEvent::decode(names::MODEL_LOAD_PROGRESS, json!(42.6)).expect("progress"),
            BackendEvent::ModelLoadProgress(43)
        );
        assert_eq!(
            BackendEvent::decode(names::MODEL_LOAD_PROGRESS, json!(250)).expect("progress"),
            BackendEvent::ModelLoadProgress(100)
        );
        assert_eq!(
            BackendEvent::decode(names::MODEL_LOAD_COMPLETE, json!(true)).expect("complete"),
            BackendEvent::ModelLoadComplete(ModelLoadOutcome::Loaded)
        );
        assert_eq!(
            BackendEvent::decode(names::MODEL_LOAD_COMPLETE, json!("unloaded")).expect("complete"),
            BackendEvent::ModelLoadComplete(ModelLoadOutcome::Unloaded)
        );
    }

    #[test]
    fn download_progress_decodes_snake_case_state() {
        let event = BackendEvent::decode(
            names::DOWNLOAD_PROGRESS,
            json!({
                "step": "model",
                "percent": 12.5,
                "speed_mbps": 3.2,
                "eta_seconds": 90,
                "state": "paused"
            }),
        )
        .expect("download progress should decode");

        assert_matches!(
            event,
            BackendEvent::DownloadProgress(progress)
                if progress.step == "model"
                    && progress.state == DownloadState::Paused
                    && progress.eta_seconds == 90
        );
    }

    #[test]
    fn status_classification_prefers_halt_then_idle() {
        assert_eq!(StatusSignal::classify("Ready"), Some(StatusSignal::Idle));
        assert_eq!(StatusSignal::classify("idle"), Some(StatusSignal::Idle));
        assert_eq!(StatusSignal::classify("Task complete"), Some(StatusSignal::Idle));
        assert_eq!(StatusSignal::classify("Thinking..."), Some(StatusSignal::Thinking));
        assert_eq!(StatusSignal::classify("Executing write_file"), Some(StatusSignal::Executing));
        assert_eq!(StatusSignal::classify("Denied"), Some(StatusSignal::Halted));
        assert_eq!(StatusSignal::classify("Cancelled"), Some(StatusSignal::Halted));
        assert_eq!(StatusSignal::classify("Responding..."), None);
        assert_eq!(StatusSignal::classify("Waiting Approval..."), None);
    }

    #[test]
    fn stream_end_reasons_parse_known_values() {
        assert_eq!(StreamEndReason::parse("complete"), StreamEndReason::Complete);
        assert_eq!(StreamEndReason::parse("denied"), StreamEndReason::Denied);
        assert_eq!(StreamEndReason::parse("max_steps"), StreamEndReason::MaxSteps);
        assert_eq!(
            StreamEndReason::parse("shutdown"),
            StreamEndReason::Other("shutdown".to_string())
        );
    }

    #[test]
    fn terminal_detection_matches_turn_lifecycle() {
        assert!(BackendEvent::StreamEnd(StreamEndReason::Complete).is_terminal());
        assert!(BackendEvent::Error("boom".to_string()).is_terminal());
        assert!(!BackendEvent::StreamChunk("partial".to_string()).is_terminal());
        assert!(!BackendEvent::Status("Ready".to_string()).is_terminal());
    }
}
