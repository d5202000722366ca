//! Tide Tmux - command layer for panes and remote hosts
//!
//! Wraps the tmux CLI (pane listing, `send-keys`) and ssh behind the
//! [`CommandRunner`] trait so the daemon can address panes on the local
//! machine and on remote hosts the same way.

pub mod error;
pub mod keys;
pub mod pane;
pub mod runner;
pub mod target;

pub use error::{Result, TmuxError};
pub use keys::KeySender;
pub use pane::{PaneInfo, PaneLocator, TmuxPaneLocator};
pub use runner::{shell_quote, CommandOutput, CommandRunner, ProcessRunner};
pub use target::TmuxTarget;
