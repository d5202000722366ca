//! Interrupt detection.
//!
//! No hook fires when the user interrupts a turn with Escape, so while a
//! local session is processing its log is tailed for the interruption
//! record Claude Code appends.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tide_core::SessionId;

use super::parser::is_interruption_record;
use super::SharedResolver;

/// Tails one log file, reporting interruptions appended after the first poll.
#[derive(Debug, Default)]
pub struct InterruptScanner {
    /// `None` until the file has been seen once
    offset: Option<u64>,
}

impl InterruptScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks newly appended complete lines. Returns true on an interruption.
    ///
    /// The first successful poll only records the current length, so
    /// interruptions from earlier turns are never reported.
    pub async fn poll(&mut self, path: &Path) -> std::io::Result<bool> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let offset = match self.offset {
            None => {
                self.offset = Some(len);
                return Ok(false);
            }
            Some(o) if len < o => {
                // Rewritten; start over from the new end
                self.offset = Some(len);
                return Ok(false);
            }
            Some(o) if len == o => return Ok(false),
            Some(o) => o,
        };

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut buf).await?;

        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(false);
        };
        self.offset = Some(offset + last_newline as u64 + 1);

        let complete = buf.get(..last_newline).unwrap_or_default();
        Ok(complete
            .split(|b| *b == b'\n')
            .filter_map(|line| serde_json::from_slice::<Value>(line).ok())
            .any(|record| is_interruption_record(&record)))
    }
}

/// Spawns a watcher that polls the session log until cancelled.
///
/// Sends the session id once per detected interruption.
pub fn spawn_interrupt_watcher(
    session_id: SessionId,
    cwd: String,
    resolver: SharedResolver,
    poll_every: Duration,
    notify: mpsc::UnboundedSender<SessionId>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut scanner = InterruptScanner::new();
        let mut path: Option<PathBuf> = None;
        let mut tick = interval(poll_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(session_id = %session_id, "interrupt watcher started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tick.tick() => {
                    if path.is_none() {
                        path = resolve_off_thread(&resolver, &cwd, &session_id).await;
                    }
                    let Some(log) = path.as_deref() else {
                        trace!(session_id = %session_id, "log not found yet");
                        continue;
                    };

                    match scanner.poll(log).await {
                        Ok(true) => {
                            debug!(session_id = %session_id, "interruption detected");
                            if notify.send(session_id.clone()).is_err() {
                                break;
                            }
                        }
                        Ok(false) => {}
                        Err(e) => trace!(session_id = %session_id, error = %e, "log poll failed"),
                    }
                }
            }
        }

        debug!(session_id = %session_id, "interrupt watcher stopped");
    })
}

/// Resolves the log path on the blocking pool; the resolver may scan every project directory.
async fn resolve_off_thread(resolver: &SharedResolver, cwd: &str, session_id: &SessionId) -> Option<PathBuf> {
    let resolver = Arc::clone(resolver);
    let cwd = cwd.to_string();
    let id = session_id.clone();
    tokio::task::spawn_blocking(move || {
        resolver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(&cwd, &id)
    })
    .await
    .ok()
    .flatten()
}
