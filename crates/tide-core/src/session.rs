//! Session entities, the phase state machine and its priority view.

use crate::chat::{ChatHistoryItem, MessageRole, ToolStatus};
use crate::error::{DomainError, DomainResult};
use crate::hook::{HookEvent, HookEventType, HookStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use tracing::warn;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Unique identifier for a Claude Code session.
///
/// Wraps the `session_id` string Claude Code passes to every hook. Ids are
/// never reused, so a record keyed by one stays valid until archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened display form (first 8 characters).
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a tool invocation.
///
/// Format: "toolu_..." (e.g., "toolu_01ABC123XYZ"). Legacy permission
/// prompts arrive with an empty id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolUseId(String);

impl ToolUseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ToolUseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ToolUseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ToolUseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Permission & Remote Context
// ============================================================================

/// The tool call a session is blocked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionContext {
    /// Empty for legacy prompts that can only be answered with keystrokes.
    pub tool_use_id: ToolUseId,
    pub tool_name: String,
    pub tool_input: serde_json::Map<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl PermissionContext {
    /// Builds the context from a permission-request event.
    pub fn from_event(event: &HookEvent, received_at: DateTime<Utc>) -> Self {
        Self {
            tool_use_id: event.correlation_id().cloned().unwrap_or_default(),
            tool_name: event
                .tool_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            tool_input: event.tool_input.clone().unwrap_or_default(),
            received_at,
        }
    }

    /// Returns true if the prompt can be answered over the hook socket.
    pub fn is_correlated(&self) -> bool {
        !self.tool_use_id.is_empty()
    }
}

/// Where a remote session's assistant runs.
///
/// Host and pane target are only meaningful together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub tmux_target: String,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, tmux_target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            tmux_target: tmux_target.into(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.tmux_target)
    }
}

// ============================================================================
// Session Phase
// ============================================================================

/// Lifecycle phase of a session.
///
/// The waiting-for-approval variant owns its [`PermissionContext`], so a
/// session has an active permission exactly when it is in that phase.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "permission", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing in flight and nothing asked of the user.
    #[default]
    Idle,

    /// The assistant is working on a turn.
    Processing,

    /// Context is being compacted.
    Compacting,

    /// Blocked on the user approving a tool call.
    WaitingForApproval(PermissionContext),

    /// The turn finished and the assistant waits for the next prompt.
    WaitingForInput,

    /// The session ended. Terminal.
    Ended,
}

impl SessionPhase {
    /// Returns the display label for this phase.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Compacting => "compacting",
            Self::WaitingForApproval(_) => "waiting_for_approval",
            Self::WaitingForInput => "waiting_for_input",
            Self::Ended => "ended",
        }
    }

    /// Returns true if the assistant is doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing | Self::Compacting)
    }

    #[must_use]
    pub fn is_waiting_for_approval(&self) -> bool {
        matches!(self, Self::WaitingForApproval(_))
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Returns the pending permission, if any.
    pub fn permission(&self) -> Option<&PermissionContext> {
        match self {
            Self::WaitingForApproval(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Sort rank for the priority view. Lower sorts first.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::WaitingForApproval(_) | Self::Processing | Self::Compacting => 0,
            Self::WaitingForInput => 1,
            Self::Idle | Self::Ended => 2,
        }
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// `Ended` has no outgoing transitions. Every other phase may move to
    /// any phase, including a new approval replacing an old one.
    #[must_use]
    pub fn can_transition_to(&self, next: &SessionPhase) -> bool {
        match (self, next) {
            (Self::Ended, Self::Ended) => true,
            (Self::Ended, _) => false,
            _ => true,
        }
    }

    /// Computes the phase a hook event leads to, without checking legality.
    ///
    /// `SessionStart` opens an idle session. `SubagentStop` and informational
    /// notifications leave the phase alone. While an approval is pending,
    /// tool events for other tool calls do not clear it.
    pub fn next_for_event(&self, event: &HookEvent, now: DateTime<Utc>) -> SessionPhase {
        if let Self::WaitingForApproval(ctx) = self {
            match event.event {
                HookEventType::PreToolUse => return self.clone(),
                HookEventType::PostToolUse if !Self::resolves(ctx, event) => {
                    return self.clone();
                }
                _ => {}
            }
        }

        match event.event {
            HookEventType::SessionStart => return Self::Idle,
            HookEventType::SubagentStop => return self.clone(),
            HookEventType::PreCompact => return Self::Compacting,
            HookEventType::SessionEnd => return Self::Ended,
            _ => {}
        }

        match event.status {
            HookStatus::Processing | HookStatus::RunningTool => Self::Processing,
            HookStatus::WaitingForApproval => {
                Self::WaitingForApproval(PermissionContext::from_event(event, now))
            }
            HookStatus::WaitingForInput => Self::WaitingForInput,
            HookStatus::Compacting => Self::Compacting,
            HookStatus::Ended => Self::Ended,
            HookStatus::Notification | HookStatus::Unknown => self.clone(),
        }
    }

    /// Returns true if a post-tool event finishes the pending tool call.
    fn resolves(ctx: &PermissionContext, event: &HookEvent) -> bool {
        match event.correlation_id() {
            Some(id) if ctx.is_correlated() => *id == ctx.tool_use_id,
            _ => event.tool_name.as_deref() == Some(ctx.tool_name.as_str()),
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Authoritative state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub cwd: String,
    pub phase: SessionPhase,
    pub pid: Option<u32>,
    pub tty: Option<String>,
    pub is_in_tmux: bool,
    pub remote: Option<RemoteTarget>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_user_message_date: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
    pub last_message_role: Option<MessageRole>,
    pub last_tool_name: Option<String>,
    pub chat_items: Vec<ChatHistoryItem>,
    pub history_loaded: bool,
}

impl SessionState {
    /// Creates an idle session.
    pub fn new(session_id: SessionId, cwd: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            cwd: cwd.into(),
            phase: SessionPhase::Idle,
            pid: None,
            tty: None,
            is_in_tmux: false,
            remote: None,
            created_at: now,
            last_activity: now,
            last_user_message_date: None,
            last_message: None,
            last_message_role: None,
            last_tool_name: None,
            chat_items: Vec::new(),
            history_loaded: false,
        }
    }

    /// Creates a session from the first event seen for it.
    pub fn from_event(event: &HookEvent, now: DateTime<Utc>) -> Self {
        Self::new(event.session_id.clone(), event.cwd.clone(), now)
    }

    /// Returns the pending permission, if any.
    pub fn active_permission(&self) -> Option<&PermissionContext> {
        self.phase.permission()
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Applies a hook event.
    ///
    /// Metadata always updates. An illegal phase change leaves the phase
    /// unchanged and is reported as a state inconsistency.
    pub fn apply_hook_event(&mut self, event: &HookEvent, now: DateTime<Utc>) -> DomainResult<()> {
        self.last_activity = now;

        if !event.cwd.is_empty() {
            self.cwd.clone_from(&event.cwd);
        }
        if let Some(pid) = event.pid {
            self.pid = Some(pid);
        }
        if let Some(tty) = event.tty.as_ref().filter(|t| !t.is_empty()) {
            self.tty = Some(tty.clone());
        }
        if event.is_in_tmux() {
            self.is_in_tmux = true;
        }
        match event.remote_target() {
            Some(remote) => self.remote = Some(remote),
            None if event.remote_host.as_deref().is_some_and(|h| !h.is_empty()) => {
                warn!(
                    session_id = %self.session_id,
                    "remote host reported without tmux target, ignoring"
                );
            }
            None => {}
        }
        if event.event.is_tool_event() {
            if let Some(name) = &event.tool_name {
                self.last_tool_name = Some(name.clone());
            }
        }
        if event.event == HookEventType::UserPromptSubmit {
            self.last_user_message_date = Some(now);
        }

        let next = self.phase.next_for_event(event, now);
        self.transition_to(next)
    }

    /// Moves to `next` if the transition is legal.
    pub fn transition_to(&mut self, next: SessionPhase) -> DomainResult<()> {
        if self.phase == next {
            return Ok(());
        }
        if !self.phase.can_transition_to(&next) {
            return Err(DomainError::inconsistency(
                &self.session_id,
                format!("invalid transition {} -> {}", self.phase, next),
            ));
        }
        self.phase = next;
        Ok(())
    }

    /// Replaces the conversation history and refreshes the preview fields.
    pub fn set_history(&mut self, items: Vec<ChatHistoryItem>) {
        if let Some((role, text)) = items.iter().rev().find_map(ChatHistoryItem::preview) {
            self.last_message_role = Some(role);
            self.last_message = Some(text);
        }
        if let Some(name) = items.iter().rev().find_map(|item| item.tool_call().map(|t| t.name.clone())) {
            self.last_tool_name = Some(name);
        }
        if let Some(ts) = items
            .iter()
            .rev()
            .find(|item| item.is_user_message())
            .map(|item| item.timestamp)
        {
            self.last_user_message_date = Some(ts);
        }
        self.chat_items = items;
        self.history_loaded = true;
        self.mark_pending_tool();
    }

    /// Flags the tool call behind the active permission request, if it is in the history.
    fn mark_pending_tool(&mut self) {
        let Some(pending) = self.phase.permission().map(|p| p.tool_use_id.clone()) else {
            return;
        };
        if pending.is_empty() {
            return;
        }
        if let Some(tool) = self
            .chat_items
            .iter_mut()
            .rev()
            .filter_map(ChatHistoryItem::tool_call_mut)
            .find(|t| t.tool_use_id == pending && !t.status.is_finished())
        {
            tool.status = ToolStatus::WaitingForApproval;
        }
    }
}

/// Orders sessions for display: urgent phases first, newest activity first.
pub fn sort_by_priority(sessions: &mut [SessionState]) {
    sessions.sort_by_key(|s| (s.phase.priority(), Reverse(s.last_activity)));
}
