//! Client interface to the engine actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()`
//! - Channel errors are mapped to `EngineError::ChannelClosed`

use tokio::sync::{mpsc, oneshot, watch};

use tide_core::{HookEvent, SessionId, SessionState, ToolUseId};

use super::commands::{EngineCommand, EngineError};
use crate::approval::ApprovalDecision;

/// Cheap-to-clone handle shared by connection tasks and the UI side.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<Vec<SessionState>>,
}

impl EngineHandle {
    pub fn new(sender: mpsc::Sender<EngineCommand>, snapshot: watch::Receiver<Vec<SessionState>>) -> Self {
        Self { sender, snapshot }
    }

    /// Forwards a hook event. Returns once the event is queued.
    pub async fn process(&self, event: HookEvent) -> Result<(), EngineError> {
        self.sender
            .send(EngineCommand::ProcessHook {
                event: Box::new(event),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Reports that a pending permission lost its hook connection.
    pub async fn permission_failed(&self, session_id: SessionId, tool_use_id: ToolUseId) -> Result<(), EngineError> {
        self.sender
            .send(EngineCommand::PermissionFailed {
                session_id,
                tool_use_id,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Delivers an approval decision.
    ///
    /// `Ok(false)` means the decision could not be delivered and the
    /// session is unchanged (or, for a vanished hook connection, idle).
    ///
    /// # Errors
    ///
    /// - `EngineError::SessionNotFound` for an unknown session
    /// - `EngineError::NoPendingApproval` if nothing is waiting
    /// - `EngineError::ApprovalInFlight` while an earlier decision is still being typed
    /// - `EngineError::ChannelClosed` if the engine has stopped
    pub async fn approve(&self, session_id: SessionId, decision: ApprovalDecision) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(EngineCommand::Approve {
                session_id,
                decision,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Schedules a history refresh for a session.
    pub async fn load_history(&self, session_id: SessionId) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(EngineCommand::LoadHistory {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Removes a session record.
    pub async fn archive(&self, session_id: SessionId) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(EngineCommand::Archive {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Returns `None` if the session doesn't exist or the engine has stopped.
    pub async fn session(&self, session_id: SessionId) -> Option<SessionState> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(EngineCommand::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// All sessions, in priority order.
    pub async fn sessions(&self) -> Vec<SessionState> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(EngineCommand::GetAllSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Receives the full session list after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<SessionState>> {
        self.snapshot.clone()
    }
}
