//! Finding the tmux pane a local assistant process runs in.
//!
//! Lists every pane with its shell pid and tty, then:
//! 1. Walks the process tree from the target pid upward
//! 2. Returns the pane whose shell pid is an ancestor
//! 3. Falls back to matching the controlling tty

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::{Pid, System};
use tracing::{debug, trace};

use crate::error::{Result, TmuxError};
use crate::runner::CommandRunner;
use crate::target::TmuxTarget;

/// Prevents runaway walks on cyclic or very deep process trees.
const MAX_ANCESTRY_DEPTH: usize = 20;

const LIST_PANES_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index} #{pane_pid} #{pane_tty}";

/// Resolves a local session to its tmux pane.
#[async_trait]
pub trait PaneLocator: Send + Sync {
    async fn find_by_pid(&self, pid: u32) -> Result<Option<TmuxTarget>>;

    async fn find_by_tty(&self, tty: &str) -> Result<Option<TmuxTarget>>;

    /// Tries the pid first, then the tty.
    async fn locate(&self, pid: Option<u32>, tty: Option<&str>) -> Result<TmuxTarget> {
        if let Some(pid) = pid {
            if let Some(target) = self.find_by_pid(pid).await? {
                return Ok(target);
            }
        }
        if let Some(tty) = tty {
            if let Some(target) = self.find_by_tty(tty).await? {
                return Ok(target);
            }
        }
        Err(TmuxError::PaneNotFound(format!("pid={pid:?} tty={tty:?}")))
    }
}

/// A row of `tmux list-panes -a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub target: TmuxTarget,
    pub shell_pid: u32,
    pub tty: String,
}

/// [`PaneLocator`] backed by the local tmux server.
pub struct TmuxPaneLocator {
    runner: Arc<dyn CommandRunner>,
}

impl TmuxPaneLocator {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let args = vec![
            "list-panes".to_string(),
            "-a".to_string(),
            "-F".to_string(),
            LIST_PANES_FORMAT.to_string(),
        ];
        let output = self.runner.run(None, "tmux", &args).await?;
        if !output.is_success() {
            // No tmux server running
            debug!(stderr = %output.stderr.trim(), "tmux list-panes failed");
            return Ok(Vec::new());
        }
        Ok(parse_pane_list(&output.stdout))
    }
}

#[async_trait]
impl PaneLocator for TmuxPaneLocator {
    async fn find_by_pid(&self, pid: u32) -> Result<Option<TmuxTarget>> {
        let panes = self.list_panes().await?;
        if panes.is_empty() {
            return Ok(None);
        }
        trace!(pane_count = panes.len(), "found tmux panes");

        let ancestry = tokio::task::spawn_blocking(move || process_ancestry(pid))
            .await
            .unwrap_or_default();

        let found = match_ancestry(&panes, &ancestry);
        match &found {
            Some(target) => debug!(pid, %target, "found tmux pane for process"),
            None => debug!(pid, "no tmux pane found for process"),
        }
        Ok(found)
    }

    async fn find_by_tty(&self, tty: &str) -> Result<Option<TmuxTarget>> {
        let panes = self.list_panes().await?;
        Ok(match_tty(&panes, tty))
    }
}

/// Parses `tmux list-panes` output produced with [`LIST_PANES_FORMAT`].
pub fn parse_pane_list(stdout: &str) -> Vec<PaneInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            // Session names may contain spaces; the last two fields never do.
            let mut parts = line.rsplitn(3, ' ');
            let tty = parts.next()?;
            let pid = parts.next()?.parse().ok()?;
            let target = parts.next()?.parse().ok()?;
            Some(PaneInfo {
                target,
                shell_pid: pid,
                tty: tty.to_string(),
            })
        })
        .collect()
}

/// Returns the first pane whose shell is in `ancestry` (nearest ancestor first).
pub fn match_ancestry(panes: &[PaneInfo], ancestry: &[u32]) -> Option<TmuxTarget> {
    let by_pid: HashMap<u32, &TmuxTarget> = panes.iter().map(|p| (p.shell_pid, &p.target)).collect();
    ancestry
        .iter()
        .find_map(|pid| by_pid.get(pid).map(|t| (*t).clone()))
}

/// Returns the pane attached to `tty`, accepting `ttys001` or `/dev/ttys001`.
pub fn match_tty(panes: &[PaneInfo], tty: &str) -> Option<TmuxTarget> {
    let wanted = normalize_tty(tty);
    panes
        .iter()
        .find(|p| normalize_tty(&p.tty) == wanted)
        .map(|p| p.target.clone())
}

fn normalize_tty(tty: &str) -> &str {
    tty.trim().strip_prefix("/dev/").unwrap_or(tty.trim())
}

/// Returns `pid` followed by its ancestors, stopping at init.
fn process_ancestry(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_all();

    let mut chain = vec![pid];
    let mut current = Pid::from_u32(pid);
    while chain.len() < MAX_ANCESTRY_DEPTH {
        match system.process(current).and_then(|p| p.parent()) {
            Some(parent) if parent.as_u32() > 1 => {
                chain.push(parent.as_u32());
                current = parent;
            }
            _ => break,
        }
    }
    chain
}
