//! Reply frames written back to a waiting hook script.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision the hook script relays to Claude Code.
///
/// `Ask` tells the hook to fall back to Claude Code's own prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    Allow,
    Deny,
    Ask,
}

impl fmt::Display for PermissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// The single reply frame of a permission-request connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub decision: PermissionDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionResponse {
    pub fn allow() -> Self {
        Self {
            decision: PermissionDecision::Allow,
            reason: None,
        }
    }

    pub fn deny(reason: Option<String>) -> Self {
        Self {
            decision: PermissionDecision::Deny,
            reason: reason.filter(|r| !r.is_empty()),
        }
    }
}
