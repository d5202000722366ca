//! Engine mailbox messages and errors.
//!
//! - `EngineCommand`: requests from connections and the UI side
//! - `Completion`: results of background work, reported back to the actor
//! - `EngineError`: failures surfaced to callers

use thiserror::Error;
use tokio::sync::oneshot;

use tide_core::{DomainError, HookEvent, SessionId, SessionState, ToolUseId};
use tide_tmux::TmuxError;

use crate::approval::ApprovalDecision;
use crate::history::LoadOutcome;
use crate::remote::FetchError;

// ============================================================================
// Engine Commands
// ============================================================================

#[derive(Debug)]
pub enum EngineCommand {
    /// A decoded hook event. Fire-and-forget.
    ProcessHook {
        /// Boxed to keep the enum small
        event: Box<HookEvent>,
    },

    /// The hook connection of a pending permission went away.
    PermissionFailed {
        session_id: SessionId,
        tool_use_id: ToolUseId,
    },

    /// Deliver a decision for the session's pending permission.
    ///
    /// Answers `true` once the decision reached Claude Code.
    Approve {
        session_id: SessionId,
        decision: ApprovalDecision,
        respond_to: oneshot::Sender<Result<bool, EngineError>>,
    },

    /// Refresh the session's conversation history now.
    LoadHistory {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    /// Drop a session record.
    Archive {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionState>>,
    },

    GetAllSessions {
        respond_to: oneshot::Sender<Vec<SessionState>>,
    },
}

// ============================================================================
// Background Completions
// ============================================================================

/// Result of work the actor handed off to another task.
#[derive(Debug)]
pub(crate) enum Completion {
    LocalHistory(LoadOutcome),

    RemoteHistory {
        session_id: SessionId,
        result: Result<Option<String>, FetchError>,
    },

    Keystrokes {
        session_id: SessionId,
        result: Result<(), TmuxError>,
        respond_to: oneshot::Sender<Result<bool, EngineError>>,
    },
}

// ============================================================================
// Engine Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine channel closed")]
    ChannelClosed,

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session {0} is not waiting for approval")]
    NoPendingApproval(SessionId),

    #[error("an approval for session {0} is already being delivered")]
    ApprovalInFlight(SessionId),
}

impl From<EngineError> for DomainError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::ChannelClosed => DomainError::protocol(err.to_string()),
            EngineError::SessionNotFound(id) => DomainError::lookup(id.to_string(), err.to_string()),
            EngineError::NoPendingApproval(id) | EngineError::ApprovalInFlight(id) => {
                DomainError::inconsistency(id, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let id = SessionId::new("s1");
        assert!(matches!(
            DomainError::from(EngineError::SessionNotFound(id.clone())),
            DomainError::Lookup { .. }
        ));
        assert!(matches!(
            DomainError::from(EngineError::ApprovalInFlight(id)),
            DomainError::StateInconsistency { .. }
        ));
    }
}
