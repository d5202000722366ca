//! Domain-specific error types following panic-free policy.

use crate::SessionId;
use thiserror::Error;

/// Errors that can occur in domain operations.
///
/// Every component error converts into one of these categories when it
/// crosses a boundary. None of them is fatal to the daemon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or oversized frame on an ingest connection
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Pane, log file or session could not be found
    #[error("Lookup failed for {what}: {reason}")]
    Lookup { what: String, reason: String },

    /// Remote command or ssh invocation failed
    #[error("Transport failure on {host}: {reason}")]
    Transport { host: String, reason: String },

    /// A complete log record could not be decoded
    #[error("Failed to parse {field}: {reason}")]
    Parse { field: String, reason: String },

    /// An event referenced state that does not exist or no longer matches
    #[error("State inconsistency for session {session_id}: {reason}")]
    StateInconsistency {
        session_id: SessionId,
        reason: String,
    },
}

impl DomainError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn lookup(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Lookup {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn inconsistency(session_id: &SessionId, reason: impl Into<String>) -> Self {
        Self::StateInconsistency {
            session_id: session_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
