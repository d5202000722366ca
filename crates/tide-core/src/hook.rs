//! Hook events delivered by the Claude Code hook script.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{RemoteTarget, SessionId, ToolUseId};

/// Types of hook events from Claude Code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookEventType {
    /// A new session started (or resumed)
    SessionStart,

    /// The user submitted a prompt
    UserPromptSubmit,

    /// Before a tool is executed
    PreToolUse,

    /// After a tool completes execution
    PostToolUse,

    /// Claude Code is asking the user to approve a tool call
    PermissionRequest,

    /// Notification event (idle prompt, informational)
    Notification,

    /// The assistant finished its turn
    Stop,

    /// A delegated subagent finished
    SubagentStop,

    /// The session is about to end
    SessionEnd,

    /// Context is about to be compacted
    PreCompact,

    /// Event name this build does not know about
    Unknown(String),
}

impl HookEventType {
    /// Parses from a hook event name string.
    ///
    /// Unknown names map to [`HookEventType::Unknown`] rather than failing, so
    /// newer Claude Code versions never break ingestion.
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "SessionStart" => Self::SessionStart,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "PermissionRequest" => Self::PermissionRequest,
            "Notification" => Self::Notification,
            "Stop" => Self::Stop,
            "SubagentStop" => Self::SubagentStop,
            "SessionEnd" => Self::SessionEnd,
            "PreCompact" => Self::PreCompact,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns true for tool lifecycle events.
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self,
            Self::PreToolUse | Self::PostToolUse | Self::PermissionRequest
        )
    }
}

impl HookEventType {
    /// Returns the wire name of the event.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::PermissionRequest => "PermissionRequest",
            Self::Notification => "Notification",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::SessionEnd => "SessionEnd",
            Self::PreCompact => "PreCompact",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for HookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for HookEventType {
    fn from(name: String) -> Self {
        Self::from_event_name(&name)
    }
}

impl From<HookEventType> for String {
    fn from(event: HookEventType) -> Self {
        event.as_str().to_string()
    }
}

/// Status the hook script derived for the event.
///
/// The hook maps each Claude Code event to one of these before sending,
/// e.g. `PermissionRequest` becomes `waiting_for_approval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Processing,
    RunningTool,
    WaitingForApproval,
    WaitingForInput,
    Notification,
    Compacting,
    Ended,
    #[serde(other)]
    Unknown,
}

impl HookStatus {
    /// Parses the wire value, falling back to `Unknown`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "processing" => Self::Processing,
            "running_tool" => Self::RunningTool,
            "waiting_for_approval" => Self::WaitingForApproval,
            "waiting_for_input" => Self::WaitingForInput,
            "notification" => Self::Notification,
            "compacting" => Self::Compacting,
            "ended" => Self::Ended,
            _ => Self::Unknown,
        }
    }
}

/// A normalized hook event, ready for the session engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub session_id: SessionId,
    pub cwd: String,
    pub event: HookEventType,
    pub status: HookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<serde_json::Map<String, serde_json::Value>>,
    /// Correlation id. Empty for legacy permission prompts with no cached id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<ToolUseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_pane: Option<String>,
}

impl HookEvent {
    /// Creates an event with only the required fields set.
    pub fn new(
        session_id: impl Into<SessionId>,
        cwd: impl Into<String>,
        event: HookEventType,
        status: HookStatus,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            cwd: cwd.into(),
            event,
            status,
            pid: None,
            tty: None,
            tool_name: None,
            tool_input: None,
            tool_use_id: None,
            notification_type: None,
            message: None,
            remote_host: None,
            tmux_target: None,
            tmux_pane: None,
        }
    }

    /// Returns true if the hook script is blocked waiting for a decision.
    pub fn expects_response(&self) -> bool {
        self.event == HookEventType::PermissionRequest
            && self.status == HookStatus::WaitingForApproval
    }

    /// Returns the correlation id if present and non-empty.
    pub fn correlation_id(&self) -> Option<&ToolUseId> {
        self.tool_use_id.as_ref().filter(|id| !id.is_empty())
    }

    /// Builds the remote target when both host and tmux target are known.
    pub fn remote_target(&self) -> Option<RemoteTarget> {
        match (&self.remote_host, &self.tmux_target) {
            (Some(host), Some(target)) if !host.is_empty() && !target.is_empty() => {
                Some(RemoteTarget::new(host.clone(), target.clone()))
            }
            _ => None,
        }
    }

    /// Returns true if the event was emitted from inside a tmux pane.
    pub fn is_in_tmux(&self) -> bool {
        self.tmux_pane.is_some() || self.tmux_target.is_some()
    }
}
