//! Conversation history items reconstructed from the session log.

use crate::session::ToolUseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum characters kept in a preview string.
const PREVIEW_MAX_CHARS: usize = 120;

/// Who produced the latest previewed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// One entry of a session's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ChatItemKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ChatItemKind {
    User(String),
    Assistant(String),
    ToolCall(ToolCallItem),
    Thinking(String),
    Interrupted,
}

impl ChatHistoryItem {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, kind: ChatItemKind) -> Self {
        Self {
            id: id.into(),
            timestamp,
            kind,
        }
    }

    pub fn tool_call(&self) -> Option<&ToolCallItem> {
        match &self.kind {
            ChatItemKind::ToolCall(tool) => Some(tool),
            _ => None,
        }
    }

    pub fn tool_call_mut(&mut self) -> Option<&mut ToolCallItem> {
        match &mut self.kind {
            ChatItemKind::ToolCall(tool) => Some(tool),
            _ => None,
        }
    }

    pub fn is_user_message(&self) -> bool {
        matches!(self.kind, ChatItemKind::User(_))
    }

    /// Returns the role and truncated text shown as the session's latest message.
    ///
    /// Thinking blocks and interruption markers have no preview.
    pub fn preview(&self) -> Option<(MessageRole, String)> {
        match &self.kind {
            ChatItemKind::User(text) => Some((MessageRole::User, truncate(text))),
            ChatItemKind::Assistant(text) => Some((MessageRole::Assistant, truncate(text))),
            ChatItemKind::ToolCall(tool) => Some((MessageRole::Tool, truncate(&tool.summary()))),
            ChatItemKind::Thinking(_) | ChatItemKind::Interrupted => None,
        }
    }
}

// ============================================================================
// Tool Calls
// ============================================================================

/// Status of a tool call as seen in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Running,
    WaitingForApproval,
    Success,
    Error,
    Interrupted,
}

impl ToolStatus {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Interrupted)
    }
}

/// Result payload attached to a finished tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolResult {
    Text(String),
    /// The structured `toolUseResult` object Claude Code records.
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallItem {
    pub tool_use_id: ToolUseId,
    pub name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub status: ToolStatus,
    pub result: Option<ToolResult>,
    /// Tool calls made by a delegated subagent, in log order.
    pub subagent_tools: Vec<SubagentToolCall>,
}

impl ToolCallItem {
    pub fn running(
        tool_use_id: ToolUseId,
        name: impl Into<String>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            tool_use_id,
            name: name.into(),
            input,
            status: ToolStatus::Running,
            result: None,
            subagent_tools: Vec::new(),
        }
    }

    /// Short human summary, e.g. `Bash: cargo test`.
    pub fn summary(&self) -> String {
        match input_hint(&self.input) {
            Some(hint) => format!("{}: {}", self.name, hint),
            None => self.name.clone(),
        }
    }
}

/// A tool call made inside a subagent's own log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentToolCall {
    pub tool_use_id: ToolUseId,
    pub name: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub status: ToolStatus,
    pub result_text: Option<String>,
}

/// Picks the most descriptive input field for common tools.
fn input_hint(input: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    ["command", "file_path", "path", "pattern", "url", "description", "prompt"]
        .iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(PREVIEW_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", trimmed.get(..idx).unwrap_or(trimmed)),
        None => trimmed.to_string(),
    }
}
