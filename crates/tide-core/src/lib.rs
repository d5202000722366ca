//! Tide Core - Shared types for Claude Code session monitoring
//!
//! This crate provides the domain types shared by the wire protocol,
//! the tmux layer and the daemon (tided): sessions and their phase
//! machine, hook events, and reconstructed conversation history.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod chat;
pub mod error;
pub mod hook;
pub mod session;

// Re-exports for convenience
pub use chat::{
    ChatHistoryItem, ChatItemKind, MessageRole, SubagentToolCall, ToolCallItem, ToolResult,
    ToolStatus,
};
pub use error::{DomainError, DomainResult};
pub use hook::{HookEvent, HookEventType, HookStatus};
pub use session::{
    sort_by_priority, PermissionContext, RemoteTarget, SessionId, SessionPhase, SessionState,
    ToolUseId,
};
