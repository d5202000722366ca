//! Delivering approval decisions back to a waiting session.
//!
//! A permission request correlated by `tool_use_id` still has its hook
//! connection open, so the decision is written to that socket. Without an
//! id the only channel left is the terminal: the choice is typed into the
//! session's tmux pane, locally or over ssh.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tide_core::{RemoteTarget, SessionId, SessionState, ToolUseId};
use tide_protocol::PermissionResponse;
use tide_tmux::{CommandRunner, KeySender, PaneLocator, TmuxError, TmuxTarget};

use crate::ingest::{PendingPermissions, Resolution};

/// A user's answer to a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    ApproveOnce,
    /// Approve and let Claude Code remember the rule for the session
    ApproveAlways,
    Deny { reason: Option<String> },
}

impl ApprovalDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: Some(reason.into()),
        }
    }

    /// The reply frame for the hook socket.
    ///
    /// The hook protocol has no "always"; it is approved once and the rule
    /// prompt is left to Claude Code.
    pub fn to_response(&self) -> PermissionResponse {
        match self {
            Self::ApproveOnce | Self::ApproveAlways => PermissionResponse::allow(),
            Self::Deny { reason } => PermissionResponse::deny(reason.clone()),
        }
    }

    /// Lines typed into the terminal prompt, each followed by Enter.
    pub fn keystrokes(&self) -> Vec<String> {
        match self {
            Self::ApproveOnce => vec!["1".to_string()],
            Self::ApproveAlways => vec!["2".to_string()],
            Self::Deny { reason } => {
                let mut lines = vec!["3".to_string()];
                if let Some(reason) = reason.as_deref().filter(|r| !r.trim().is_empty()) {
                    lines.push(reason.to_string());
                }
                lines
            }
        }
    }
}

/// Where a session's terminal lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneAddress {
    /// Found through the process tree or the terminal device
    Local { pid: Option<u32>, tty: Option<String> },
    Remote(RemoteTarget),
}

impl PaneAddress {
    pub fn for_session(session: &SessionState) -> Option<Self> {
        if let Some(remote) = &session.remote {
            return Some(Self::Remote(remote.clone()));
        }
        if session.pid.is_none() && session.tty.is_none() {
            return None;
        }
        Some(Self::Local {
            pid: session.pid,
            tty: session.tty.clone(),
        })
    }
}

/// How a decision for a session would be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRoute {
    Socket(ToolUseId),
    Keystrokes(PaneAddress),
    /// No correlation id and no way to reach the terminal
    Unroutable,
    /// The session is not waiting for approval
    NotWaiting,
}

/// Picks exactly one delivery path for a session's pending approval.
pub fn route(session: &SessionState) -> ApprovalRoute {
    let Some(permission) = session.active_permission() else {
        return ApprovalRoute::NotWaiting;
    };
    if permission.is_correlated() {
        return ApprovalRoute::Socket(permission.tool_use_id.clone());
    }
    match PaneAddress::for_session(session) {
        Some(address) => ApprovalRoute::Keystrokes(address),
        None => ApprovalRoute::Unroutable,
    }
}

#[derive(Clone)]
pub struct ApprovalRouter {
    pending: Arc<PendingPermissions>,
    keys: KeySender,
    locator: Arc<dyn PaneLocator>,
}

impl ApprovalRouter {
    pub fn new(
        pending: Arc<PendingPermissions>,
        runner: Arc<dyn CommandRunner>,
        locator: Arc<dyn PaneLocator>,
    ) -> Self {
        Self {
            pending,
            keys: KeySender::new(runner),
            locator,
        }
    }

    pub fn pending(&self) -> &Arc<PendingPermissions> {
        &self.pending
    }

    /// Answers a correlated request through its hook connection.
    pub fn respond(&self, session_id: &SessionId, tool_use_id: &ToolUseId, decision: &ApprovalDecision) -> Resolution {
        let resolution = self
            .pending
            .respond(session_id, tool_use_id, decision.to_response());
        info!(
            session_id = %session_id,
            tool_use_id = %tool_use_id,
            ?decision,
            ?resolution,
            "approval sent over socket"
        );
        resolution
    }

    /// Finds the pane for an address. Remote targets are taken as reported.
    pub async fn resolve_pane(&self, address: &PaneAddress) -> Result<(Option<String>, TmuxTarget), TmuxError> {
        match address {
            PaneAddress::Remote(remote) => {
                let target = remote.tmux_target.parse()?;
                Ok((Some(remote.host.clone()), target))
            }
            PaneAddress::Local { pid, tty } => {
                let target = self.locator.locate(*pid, tty.as_deref()).await?;
                Ok((None, target))
            }
        }
    }

    /// Types the decision into the session's terminal prompt.
    ///
    /// Stops between keys once `cancel` fires, so a prompt that has already
    /// gone away never receives a stray Enter.
    pub async fn send_keystrokes(
        &self,
        address: &PaneAddress,
        decision: &ApprovalDecision,
        cancel: &CancellationToken,
    ) -> Result<(), TmuxError> {
        let (host, target) = self.resolve_pane(address).await?;
        debug!(host = ?host, %target, ?decision, "typing approval");
        for line in decision.keystrokes() {
            self.keys.send_line(host.as_deref(), &target, &line, cancel).await?;
        }
        info!(host = ?host, %target, "approval typed into pane");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tide_core::{PermissionContext, SessionPhase};
    use tide_protocol::PermissionDecision;

    fn waiting(tool_use_id: &str) -> SessionState {
        let now = Utc::now();
        let mut session = SessionState::new(SessionId::new("s1"), "/work", now);
        session.phase = SessionPhase::WaitingForApproval(PermissionContext {
            tool_use_id: ToolUseId::new(tool_use_id),
            tool_name: "Bash".to_string(),
            tool_input: serde_json::Map::new(),
            received_at: now,
        });
        session
    }

    #[test]
    fn test_responses() {
        assert_eq!(ApprovalDecision::ApproveOnce.to_response(), PermissionResponse::allow());
        assert_eq!(ApprovalDecision::ApproveAlways.to_response().decision, PermissionDecision::Allow);
        let deny = ApprovalDecision::deny("too risky").to_response();
        assert_eq!(deny.decision, PermissionDecision::Deny);
        assert_eq!(deny.reason.as_deref(), Some("too risky"));
    }

    #[test]
    fn test_keystrokes() {
        assert_eq!(ApprovalDecision::ApproveOnce.keystrokes(), vec!["1"]);
        assert_eq!(ApprovalDecision::ApproveAlways.keystrokes(), vec!["2"]);
        assert_eq!(ApprovalDecision::Deny { reason: None }.keystrokes(), vec!["3"]);
        assert_eq!(ApprovalDecision::deny("no").keystrokes(), vec!["3", "no"]);
        assert_eq!(ApprovalDecision::deny("  ").keystrokes(), vec!["3"]);
    }

    #[test]
    fn test_route_prefers_socket() {
        let mut session = waiting("t1");
        session.pid = Some(10);
        assert_eq!(route(&session), ApprovalRoute::Socket(ToolUseId::new("t1")));
    }

    #[test]
    fn test_route_keystrokes_without_id() {
        let mut session = waiting("");
        assert_eq!(route(&session), ApprovalRoute::Unroutable);

        session.tty = Some("/dev/ttys003".to_string());
        assert_eq!(
            route(&session),
            ApprovalRoute::Keystrokes(PaneAddress::Local {
                pid: None,
                tty: Some("/dev/ttys003".to_string())
            })
        );

        session.remote = Some(RemoteTarget::new("devbox", "main:0.1"));
        assert!(matches!(
            route(&session),
            ApprovalRoute::Keystrokes(PaneAddress::Remote(_))
        ));
    }

    #[test]
    fn test_route_not_waiting() {
        let session = SessionState::new(SessionId::new("s1"), "/work", Utc::now());
        assert_eq!(route(&session), ApprovalRoute::NotWaiting);
    }
}
