//! Errors from running tmux and ssh commands.

use std::time::Duration;

use thiserror::Error;
use tide_core::DomainError;

#[derive(Error, Debug)]
pub enum TmuxError {
    /// The program could not be started at all
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("{program} exited with {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The program did not finish within its time budget
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// No pane matched the process or terminal
    #[error("no tmux pane found for {0}")]
    PaneNotFound(String),

    #[error("invalid tmux target: {0}")]
    InvalidTarget(String),

    /// Delivery to the pane was abandoned before all keys were sent
    #[error("keystrokes to {0} cancelled")]
    Cancelled(String),
}

impl From<TmuxError> for DomainError {
    fn from(err: TmuxError) -> Self {
        match &err {
            TmuxError::PaneNotFound(what) => DomainError::lookup(what.clone(), err.to_string()),
            TmuxError::InvalidTarget(target) | TmuxError::Cancelled(target) => {
                DomainError::lookup(target.clone(), err.to_string())
            }
            TmuxError::Spawn { program, .. }
            | TmuxError::Failed { program, .. }
            | TmuxError::Timeout { program, .. } => {
                DomainError::transport(program.clone(), err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TmuxError>;
