//! Session state engine using the actor pattern.
//!
//! One task owns every `SessionState`. Hook connections and the UI side
//! talk to it through an [`EngineHandle`]; observers follow a `watch`
//! channel carrying the full, priority-sorted session list.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  EngineCommand  ┌──────────────┐  Vec<SessionState>  ┌───────────┐
//! │ hook connections │────(mpsc)──────▶│ EngineActor  │──────(watch)───────▶│ observers │
//! └──────────────────┘                 └──────────────┘                     └───────────┘
//!                                        ▲          │
//!                              Completion│          │spawn
//!                                        │          ▼
//!                         history loads, keystrokes, interrupt watchers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use tide_tmux::{CommandRunner, PaneLocator};

use crate::approval::ApprovalRouter;
use crate::config::DaemonConfig;
use crate::history::HistoryLoader;
use crate::ingest::PendingPermissions;
use crate::remote::RemoteLogFetcher;

mod actor;
mod commands;
mod handle;

pub use actor::EngineActor;
pub use commands::{EngineCommand, EngineError};
pub use handle::EngineHandle;

/// Mailbox size
const COMMAND_BUFFER: usize = 256;

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineContext {
    pub router: ApprovalRouter,
    pub loader: HistoryLoader,
    pub fetcher: RemoteLogFetcher,
    pub interrupt_poll: Duration,
}

impl EngineContext {
    /// Wires the engine's collaborators from configuration.
    ///
    /// `pending` must be the table the ingest server registers requests in.
    pub fn new(
        config: &DaemonConfig,
        pending: Arc<PendingPermissions>,
        runner: Arc<dyn CommandRunner>,
        locator: Arc<dyn PaneLocator>,
    ) -> Self {
        Self {
            router: ApprovalRouter::new(pending, Arc::clone(&runner), locator),
            loader: HistoryLoader::new(config.projects_root.clone()),
            fetcher: RemoteLogFetcher::new(runner, &config.remote),
            interrupt_poll: config.interrupt_poll(),
        }
    }
}

/// Spawns the engine actor and returns a handle to it.
///
/// The actor stops once every handle has been dropped.
pub fn spawn_engine(ctx: EngineContext) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());

    let actor = EngineActor::new(cmd_rx, snapshot_tx, ctx);
    tokio::spawn(actor.run());

    EngineHandle::new(cmd_tx, snapshot_rx)
}
