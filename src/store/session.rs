use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Whether tool-execution events are expected for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionMode {
    #[default]
    Chat,
    Turbo,
}

impl SessionMode {
    #[must_use]
    pub fn is_turbo(self) -> bool {
        matches!(self, Self::Turbo)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Model,
    Tool,
}

impl MessageRole {
    /// Maps a persisted role name; unknown names fall back to `User`.
    #[must_use]
    pub fn from_stored(role: &str) -> Self {
        match role {
            "model" | "assistant" => Self::Model,
            "tool" => Self::Tool,
            _ => Self::User,
        }
    }
}

/// Tool name and raw parameters attached to a `Tool` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: String,
    role: MessageRole,
    content: String,
    tool: Option<ToolInvocation>,
    timestamp: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn tool_result(tool: ToolInvocation, result: impl Into<String>) -> Self {
        Self {
            tool: Some(tool),
            ..Self::new(MessageRole::Tool, result)
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// Message text. For `Tool` messages this is the result text only.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn tool(&self) -> Option<&ToolInvocation> {
        self.tool.as_ref()
    }

    #[must_use]
    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub(crate) fn replace_content(&mut self, content: String) {
        self.content = content;
    }
}

/// Tool call waiting for a human decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTool {
    pub name: String,
    /// Opaque arguments exactly as the backend sent them.
    pub args: Value,
}

impl PendingTool {
    /// Arguments rendered for display: strings verbatim, anything else as JSON.
    #[must_use]
    pub fn args_text(&self) -> String {
        match &self.args {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Arguments parsed as structured JSON when the backend sent them as a string.
    #[must_use]
    pub fn parsed_args(&self) -> Option<Value> {
        match &self.args {
            Value::String(text) => serde_json::from_str(text).ok(),
            Value::Null => None,
            other => Some(other.clone()),
        }
    }
}

/// Stored agent activity. Approval waits are tracked by the pending tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Executing,
    Error(String),
}

impl AgentStatus {
    /// True when a new prompt may be accepted.
    #[must_use]
    pub fn is_idle_equivalent(&self) -> bool {
        matches!(self, Self::Idle | Self::Error(_))
    }
}

/// Exclusive view of the session: status folded together with the pending tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentPhase<'a> {
    Idle,
    Thinking,
    Executing,
    AwaitingApproval(&'a PendingTool),
    Error(&'a str),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub(crate) mode: SessionMode,
    pub(crate) status: AgentStatus,
    pub(crate) is_streaming: bool,
    pub(crate) thinking_text: String,
    pub(crate) token_count: usize,
    pub(crate) messages: Vec<Message>,
    pub(crate) pending_tool: Option<PendingTool>,
}

impl Session {
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn status(&self) -> &AgentStatus {
        &self.status
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    #[must_use]
    pub fn thinking_text(&self) -> &str {
        &self.thinking_text
    }

    /// Estimated tokens in the current streaming reply.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn pending_tool(&self) -> Option<&PendingTool> {
        self.pending_tool.as_ref()
    }

    #[must_use]
    pub fn phase(&self) -> AgentPhase<'_> {
        if let Some(pending) = &self.pending_tool {
            return AgentPhase::AwaitingApproval(pending);
        }

        match &self.status {
            AgentStatus::Idle => AgentPhase::Idle,
            AgentStatus::Thinking => AgentPhase::Thinking,
            AgentStatus::Executing => AgentPhase::Executing,
            AgentStatus::Error(message) => AgentPhase::Error(message),
        }
    }

    /// True while a turn is running or waiting on an approval.
    #[must_use]
    pub fn turn_active(&self) -> bool {
        !self.status.is_idle_equivalent() || self.pending_tool.is_some()
    }
}

pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
