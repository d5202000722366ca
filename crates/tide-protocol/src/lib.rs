//! Tide Protocol - Wire protocol between hook scripts and the daemon
//!
//! This crate provides the raw hook frame, its normalization into a
//! domain event, the permission reply frame, and the codec that frames
//! both over a Unix or TCP stream.

pub mod codec;
pub mod message;
pub mod parse;

pub use codec::{FrameError, HookFrameCodec, MAX_FRAME_SIZE};
pub use message::{PermissionDecision, PermissionResponse};
pub use parse::RawHookEvent;
