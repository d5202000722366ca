//! Table of permission requests awaiting a decision.
//!
//! Each entry owns the oneshot that wakes the hook connection holding the
//! request open. Removal from the table is the only way to resolve an
//! entry, so a request is answered or cancelled at most once.
//!
//! Every registration carries a generation number. A connection cleaning
//! up after itself removes only the entry it registered, never a newer
//! request that reused the same tool use id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use tide_core::{DomainError, SessionId, ToolUseId};
use tide_protocol::PermissionResponse;

/// What the waiting connection is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutcome {
    /// Write this response to the hook
    Respond(PermissionResponse),
    /// Close without replying; the hook falls back to the terminal prompt
    Cancelled,
}

/// Result of [`PendingPermissions::respond`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting connection
    Delivered,
    /// No such request (already resolved, cancelled or never registered)
    Unknown,
    /// The request existed but its connection had already gone away
    Disconnected { session_id: SessionId },
}

/// A registered request, as held by the connection waiting on it.
#[derive(Debug)]
pub struct Registration {
    pub generation: u64,
    pub outcome: oneshot::Receiver<PendingOutcome>,
}

struct Entry {
    session_id: SessionId,
    generation: u64,
    responder: oneshot::Sender<PendingOutcome>,
}

#[derive(Default)]
pub struct PendingPermissions {
    entries: Mutex<HashMap<ToolUseId, Entry>>,
    next_generation: AtomicU64,
}

impl PendingPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ToolUseId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a request and returns the receiver its connection waits on.
    ///
    /// A second registration for the same id cancels the first.
    pub fn register(&self, tool_use_id: ToolUseId, session_id: SessionId) -> Registration {
        let (tx, rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().insert(
            tool_use_id.clone(),
            Entry {
                session_id: session_id.clone(),
                generation,
                responder: tx,
            },
        );
        if let Some(old) = previous {
            warn!(
                tool_use_id = %tool_use_id,
                session_id = %session_id,
                "duplicate permission request, cancelling the older one"
            );
            let _ = old.responder.send(PendingOutcome::Cancelled);
        }
        debug!(tool_use_id = %tool_use_id, session_id = %session_id, generation, "permission pending");
        Registration {
            generation,
            outcome: rx,
        }
    }

    /// Resolves a request of `session_id` with a decision.
    pub fn respond(&self, session_id: &SessionId, tool_use_id: &ToolUseId, response: PermissionResponse) -> Resolution {
        let Some(entry) = self.lock().remove(tool_use_id) else {
            let err = DomainError::inconsistency(session_id, format!("no pending permission for {tool_use_id}"));
            warn!(tool_use_id = %tool_use_id, error = %err, "late or unknown permission response");
            return Resolution::Unknown;
        };

        let decision = response.decision;
        match entry.responder.send(PendingOutcome::Respond(response)) {
            Ok(()) => {
                debug!(tool_use_id = %tool_use_id, %decision, "permission resolved");
                Resolution::Delivered
            }
            Err(_) => {
                warn!(
                    tool_use_id = %tool_use_id,
                    session_id = %entry.session_id,
                    "hook connection gone before decision"
                );
                Resolution::Disconnected {
                    session_id: entry.session_id,
                }
            }
        }
    }

    /// Cancels one request. Returns true if it was pending.
    pub fn cancel(&self, tool_use_id: &ToolUseId) -> bool {
        match self.lock().remove(tool_use_id) {
            Some(entry) => {
                let _ = entry.responder.send(PendingOutcome::Cancelled);
                debug!(tool_use_id = %tool_use_id, "permission cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every request of a session, returning how many there were.
    pub fn cancel_for_session(&self, session_id: &SessionId) -> usize {
        let cancelled: Vec<Entry> = {
            let mut entries = self.lock();
            let ids: Vec<ToolUseId> = entries
                .iter()
                .filter(|(_, e)| &e.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let count = cancelled.len();
        for entry in cancelled {
            let _ = entry.responder.send(PendingOutcome::Cancelled);
        }
        if count > 0 {
            debug!(session_id = %session_id, count, "cancelled pending permissions");
        }
        count
    }

    /// Removes the request registered as `generation`, for a connection
    /// that is going away. Returns its session if it was still pending.
    ///
    /// A newer registration under the same id is left untouched.
    pub fn withdraw(&self, tool_use_id: &ToolUseId, generation: u64) -> Option<SessionId> {
        let mut entries = self.lock();
        match entries.get(tool_use_id) {
            Some(entry) if entry.generation == generation => {
                entries.remove(tool_use_id).map(|e| e.session_id)
            }
            Some(entry) => {
                debug!(
                    tool_use_id = %tool_use_id,
                    generation,
                    current = entry.generation,
                    "request superseded, leaving it in place"
                );
                None
            }
            None => None,
        }
    }

    pub fn contains(&self, tool_use_id: &ToolUseId) -> bool {
        self.lock().contains_key(tool_use_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
