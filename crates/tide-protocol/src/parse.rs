//! Parsing the frames the hook script sends.

use tide_core::{HookEvent, HookEventType, HookStatus, SessionId, ToolUseId};
use serde::Deserialize;

/// Raw hook frame JSON structure.
///
/// Flat structure mirroring what the hook script writes. The four
/// identifying fields are required; everything else may be absent or null.
/// Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHookEvent {
    // === Required ===
    pub session_id: String,
    pub cwd: String,
    pub event: String,
    pub status: String,

    // === Process info ===
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub tty: Option<String>,

    // === Tool events (PreToolUse, PostToolUse, PermissionRequest) ===
    #[serde(default, alias = "tool_name")]
    pub tool: Option<String>,
    #[serde(default)]
    pub tool_input: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,

    // === Notification ===
    #[serde(default)]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,

    // === Remote sessions (reached through ssh -R) ===
    #[serde(default)]
    pub remote_host: Option<String>,
    #[serde(default)]
    pub tmux_target: Option<String>,
    #[serde(default)]
    pub tmux_pane: Option<String>,
}

impl RawHookEvent {
    /// Parses the hook event type.
    pub fn event_type(&self) -> HookEventType {
        HookEventType::from_event_name(&self.event)
    }

    /// Returns the session ID.
    pub fn session_id(&self) -> SessionId {
        SessionId::new(&self.session_id)
    }

    /// Normalizes the frame into a domain event.
    ///
    /// Values of the wrong shape degrade to absent: a non-object
    /// `tool_input` is dropped, empty strings become `None`.
    pub fn into_event(self) -> HookEvent {
        let event = self.event_type();
        let status = HookStatus::from_wire(&self.status);
        let tool_input = match self.tool_input {
            Some(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        };

        HookEvent {
            session_id: SessionId::new(self.session_id),
            cwd: self.cwd,
            event,
            status,
            pid: self.pid,
            tty: non_empty(self.tty),
            tool_name: non_empty(self.tool),
            tool_input,
            tool_use_id: self.tool_use_id.map(ToolUseId::new),
            notification_type: non_empty(self.notification_type),
            message: self.message,
            remote_host: non_empty(self.remote_host),
            tmux_target: non_empty(self.tmux_target),
            tmux_pane: non_empty(self.tmux_pane),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
