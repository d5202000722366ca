//! Engine actor - the single owner of session state.
//!
//! Commands arrive on the mailbox; history loads, keystroke deliveries and
//! interrupt watchers run on their own tasks and report back through
//! internal channels drained by the same loop. Every committed change
//! republishes the full session list.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Responses to dropped callers are ignored
//! - Background task failures are logged and leave state unchanged

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tide_core::{
    sort_by_priority, DomainError, HookEvent, HookEventType, SessionId, SessionPhase, SessionState,
    ToolUseId,
};
use tide_tmux::TmuxError;

use super::commands::{Completion, EngineCommand, EngineError};
use super::EngineContext;
use crate::approval::{self, ApprovalDecision, ApprovalRoute};
use crate::history::{self, spawn_interrupt_watcher, remote_log_path, LoadOutcome, LoadResult, TranscriptParser};
use crate::ingest::Resolution;
use crate::remote::FetchError;

/// A decision being typed into a pane, tied to the prompt it answers.
struct KeystrokeDelivery {
    tool_name: String,
    received_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl KeystrokeDelivery {
    /// True while the session still shows the prompt this delivery answers.
    fn answers(&self, session: &SessionState) -> bool {
        session
            .active_permission()
            .is_some_and(|p| p.tool_name == self.tool_name && p.received_at == self.received_at)
    }
}

pub struct EngineActor {
    receiver: mpsc::Receiver<EngineCommand>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    interrupts_tx: mpsc::UnboundedSender<SessionId>,
    interrupts_rx: mpsc::UnboundedReceiver<SessionId>,
    snapshot: watch::Sender<Vec<SessionState>>,
    ctx: EngineContext,

    sessions: HashMap<SessionId, SessionState>,
    /// Local sessions only; absent while a load holds the parser
    parsers: HashMap<SessionId, TranscriptParser>,
    loads_in_flight: HashSet<SessionId>,
    /// Requests that arrived while a load was running, coalesced into one rerun
    reload_requested: HashSet<SessionId>,
    watchers: HashMap<SessionId, CancellationToken>,
    keystrokes_in_flight: HashMap<SessionId, KeystrokeDelivery>,
    /// Remote log paths, fixed at the first fetch; later events may carry a different cwd
    remote_logs: HashMap<SessionId, String>,
}

impl EngineActor {
    pub fn new(
        receiver: mpsc::Receiver<EngineCommand>,
        snapshot: watch::Sender<Vec<SessionState>>,
        ctx: EngineContext,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (interrupts_tx, interrupts_rx) = mpsc::unbounded_channel();
        Self {
            receiver,
            completions_tx,
            completions_rx,
            interrupts_tx,
            interrupts_rx,
            snapshot,
            ctx,
            sessions: HashMap::new(),
            parsers: HashMap::new(),
            loads_in_flight: HashSet::new(),
            reload_requested: HashSet::new(),
            watchers: HashMap::new(),
            keystrokes_in_flight: HashMap::new(),
            remote_logs: HashMap::new(),
        }
    }

    /// Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!("Session engine starting");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(done) = self.completions_rx.recv() => self.handle_completion(done),
                Some(session_id) = self.interrupts_rx.recv() => self.handle_interrupt(&session_id),
            }
        }

        for (_, token) in self.watchers.drain() {
            token.cancel();
        }
        info!(sessions = self.sessions.len(), "Session engine stopped");
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::ProcessHook { event } => self.handle_hook(*event),
            EngineCommand::PermissionFailed {
                session_id,
                tool_use_id,
            } => self.handle_permission_failed(&session_id, &tool_use_id),
            EngineCommand::Approve {
                session_id,
                decision,
                respond_to,
            } => self.handle_approve(session_id, decision, respond_to),
            EngineCommand::LoadHistory {
                session_id,
                respond_to,
            } => {
                let result = if self.sessions.contains_key(&session_id) {
                    self.schedule_load(&session_id);
                    Ok(())
                } else {
                    Err(EngineError::SessionNotFound(session_id))
                };
                let _ = respond_to.send(result);
            }
            EngineCommand::Archive {
                session_id,
                respond_to,
            } => {
                let result = self.handle_archive(session_id);
                let _ = respond_to.send(result);
            }
            EngineCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.sessions.get(&session_id).cloned());
            }
            EngineCommand::GetAllSessions { respond_to } => {
                let _ = respond_to.send(self.sorted_sessions());
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::LocalHistory(outcome) => self.finish_local_load(outcome),
            Completion::RemoteHistory { session_id, result } => self.finish_remote_load(session_id, result),
            Completion::Keystrokes {
                session_id,
                result,
                respond_to,
            } => {
                let delivered = self.finish_keystrokes(&session_id, result);
                let _ = respond_to.send(Ok(delivered));
            }
        }
    }

    // ========================================================================
    // Hook Events
    // ========================================================================

    fn handle_hook(&mut self, event: HookEvent) {
        let now = Utc::now();
        let session_id = event.session_id.clone();

        let session = self.sessions.entry(session_id.clone()).or_insert_with(|| {
            info!(session_id = %session_id, cwd = %event.cwd, "new session");
            SessionState::from_event(&event, now)
        });

        let before = session.phase.label();
        if let Err(e) = session.apply_hook_event(&event, now) {
            warn!(event = %event.event, error = %e, "ignoring phase change");
        }
        debug!(
            session_id = %session_id,
            event = %event.event,
            from = before,
            to = session.phase.label(),
            "hook applied"
        );

        match event.event {
            HookEventType::Stop | HookEventType::SessionEnd => {
                self.ctx.router.pending().cancel_for_session(&session_id);
            }
            HookEventType::PostToolUse => {
                if let Some(tool_use_id) = event.correlation_id() {
                    if !self.ctx.router.pending().cancel(tool_use_id) {
                        let err = DomainError::inconsistency(
                            &session_id,
                            format!("no pending permission for {tool_use_id}"),
                        );
                        debug!(error = %err, "finished tool had no pending permission");
                    }
                }
            }
            _ => {}
        }

        self.cancel_stale_keystrokes(&session_id);
        self.sync_watcher(&session_id);
        self.schedule_load(&session_id);
        self.publish();
    }

    fn handle_permission_failed(&mut self, session_id: &SessionId, tool_use_id: &ToolUseId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let matches = session
            .active_permission()
            .is_some_and(|p| &p.tool_use_id == tool_use_id);
        if !matches {
            debug!(session_id = %session_id, tool_use_id = %tool_use_id, "stale permission failure");
            return;
        }

        warn!(session_id = %session_id, tool_use_id = %tool_use_id, "permission request dropped");
        if let Err(e) = session.transition_to(SessionPhase::Idle) {
            warn!(error = %e, "ignoring phase change");
        }
        self.cancel_stale_keystrokes(session_id);
        self.sync_watcher(session_id);
        self.publish();
    }

    fn handle_interrupt(&mut self, session_id: &SessionId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if !session.phase.is_active() {
            return;
        }

        info!(session_id = %session_id, "session interrupted");
        if let Err(e) = session.transition_to(SessionPhase::Idle) {
            warn!(error = %e, "ignoring phase change");
        }
        self.ctx.router.pending().cancel_for_session(session_id);
        self.cancel_stale_keystrokes(session_id);
        self.sync_watcher(session_id);
        self.schedule_load(session_id);
        self.publish();
    }

    fn handle_archive(&mut self, session_id: SessionId) -> Result<(), EngineError> {
        if self.sessions.remove(&session_id).is_none() {
            return Err(EngineError::SessionNotFound(session_id));
        }
        self.stop_watcher(&session_id);
        self.cancel_stale_keystrokes(&session_id);
        self.ctx.router.pending().cancel_for_session(&session_id);
        self.parsers.remove(&session_id);
        self.remote_logs.remove(&session_id);
        self.reload_requested.remove(&session_id);
        self.ctx.loader.forget(&session_id);
        info!(session_id = %session_id, "session archived");
        self.publish();
        Ok(())
    }

    // ========================================================================
    // Approvals
    // ========================================================================

    fn handle_approve(
        &mut self,
        session_id: SessionId,
        decision: ApprovalDecision,
        respond_to: oneshot::Sender<Result<bool, EngineError>>,
    ) {
        let Some(session) = self.sessions.get(&session_id) else {
            let _ = respond_to.send(Err(EngineError::SessionNotFound(session_id)));
            return;
        };
        if self.keystrokes_in_flight.contains_key(&session_id) {
            let _ = respond_to.send(Err(EngineError::ApprovalInFlight(session_id)));
            return;
        }

        match approval::route(session) {
            ApprovalRoute::NotWaiting => {
                let _ = respond_to.send(Err(EngineError::NoPendingApproval(session_id)));
            }
            ApprovalRoute::Unroutable => {
                let err = DomainError::lookup(session_id.to_string(), "no correlation id and no pane to type into");
                warn!(error = %err, "cannot deliver approval");
                let _ = respond_to.send(Ok(false));
            }
            ApprovalRoute::Socket(tool_use_id) => {
                let delivered = match self.ctx.router.respond(&session_id, &tool_use_id, &decision) {
                    Resolution::Delivered => {
                        self.resume_processing(&session_id);
                        true
                    }
                    Resolution::Disconnected { .. } => {
                        self.handle_permission_failed(&session_id, &tool_use_id);
                        false
                    }
                    Resolution::Unknown => false,
                };
                let _ = respond_to.send(Ok(delivered));
            }
            ApprovalRoute::Keystrokes(address) => {
                let Some(permission) = session.active_permission() else {
                    let _ = respond_to.send(Err(EngineError::NoPendingApproval(session_id)));
                    return;
                };
                let cancel = CancellationToken::new();
                self.keystrokes_in_flight.insert(
                    session_id.clone(),
                    KeystrokeDelivery {
                        tool_name: permission.tool_name.clone(),
                        received_at: permission.received_at,
                        cancel: cancel.clone(),
                    },
                );

                let router = self.ctx.router.clone();
                let tx = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = router.send_keystrokes(&address, &decision, &cancel).await;
                    let _ = tx.send(Completion::Keystrokes {
                        session_id,
                        result,
                        respond_to,
                    });
                });
            }
        }
    }

    fn finish_keystrokes(&mut self, session_id: &SessionId, result: Result<(), TmuxError>) -> bool {
        let delivery = self.keystrokes_in_flight.remove(session_id);

        match result {
            Ok(()) => {}
            Err(TmuxError::Cancelled(target)) => {
                debug!(session_id = %session_id, %target, "prompt closed while typing approval");
                return false;
            }
            Err(e) => {
                let err = DomainError::from(e);
                warn!(session_id = %session_id, error = %err, "failed to type approval");
                return false;
            }
        }

        let still_waiting = match (delivery, self.sessions.get(session_id)) {
            (Some(delivery), Some(session)) => delivery.answers(session),
            _ => false,
        };
        if still_waiting {
            self.resume_processing(session_id);
        }
        true
    }

    /// Stops typing into a prompt the session is no longer showing.
    fn cancel_stale_keystrokes(&mut self, session_id: &SessionId) {
        let Some(delivery) = self.keystrokes_in_flight.get(session_id) else {
            return;
        };
        let current = self
            .sessions
            .get(session_id)
            .is_some_and(|session| delivery.answers(session));
        if !current && !delivery.cancel.is_cancelled() {
            debug!(session_id = %session_id, tool = %delivery.tool_name, "cancelling keystroke delivery");
            delivery.cancel.cancel();
        }
    }

    fn resume_processing(&mut self, session_id: &SessionId) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            if let Err(e) = session.transition_to(SessionPhase::Processing) {
                warn!(error = %e, "ignoring phase change");
            }
        }
        self.sync_watcher(session_id);
        self.publish();
    }

    // ========================================================================
    // History
    // ========================================================================

    fn schedule_load(&mut self, session_id: &SessionId) {
        if self.loads_in_flight.contains(session_id) {
            self.reload_requested.insert(session_id.clone());
            return;
        }
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };

        self.loads_in_flight.insert(session_id.clone());
        let tx = self.completions_tx.clone();
        let id = session_id.clone();

        match &session.remote {
            Some(remote) => {
                let fetcher = self.ctx.fetcher.clone();
                let host = remote.host.clone();
                let path = self
                    .remote_logs
                    .entry(session_id.clone())
                    .or_insert_with(|| remote_log_path(&session.cwd, session_id))
                    .clone();
                tokio::spawn(async move {
                    let result = fetcher.fetch_file(&host, &path).await;
                    let _ = tx.send(Completion::RemoteHistory { session_id: id, result });
                });
            }
            None => {
                let parser = self.parsers.remove(session_id).unwrap_or_default();
                let loader = self.ctx.loader.clone();
                let cwd = session.cwd.clone();
                tokio::task::spawn_blocking(move || {
                    let outcome = loader.load_local(id, &cwd, parser);
                    let _ = tx.send(Completion::LocalHistory(outcome));
                });
            }
        }
    }

    fn finish_local_load(&mut self, outcome: LoadOutcome) {
        let LoadOutcome {
            session_id,
            parser,
            result,
        } = outcome;

        if let Some(session) = self.sessions.get_mut(&session_id) {
            self.parsers.insert(session_id.clone(), parser);
            if let LoadResult::Updated(items) = result {
                session.set_history(items);
                self.publish();
            }
        }
        self.finish_load(&session_id);
    }

    fn finish_remote_load(&mut self, session_id: SessionId, result: Result<Option<String>, FetchError>) {
        match result {
            Ok(Some(content)) => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.set_history(history::parse_full(&content));
                    debug!(session_id = %session_id, items = session.chat_items.len(), "remote history loaded");
                    self.publish();
                }
            }
            Ok(None) => {
                debug!(session_id = %session_id, "remote log missing or empty");
            }
            Err(e) => {
                let err = DomainError::from(e);
                warn!(session_id = %session_id, error = %err, "remote history unavailable");
            }
        }
        self.finish_load(&session_id);
    }

    fn finish_load(&mut self, session_id: &SessionId) {
        self.loads_in_flight.remove(session_id);
        if self.reload_requested.remove(session_id) {
            self.schedule_load(session_id);
        }
    }

    // ========================================================================
    // Interrupt Watchers
    // ========================================================================

    /// Starts or stops the session's watcher to match its phase.
    fn sync_watcher(&mut self, session_id: &SessionId) {
        let watch = match self.sessions.get(session_id) {
            Some(session) => match session.phase {
                SessionPhase::Processing => Some(!session.is_remote()),
                SessionPhase::Idle | SessionPhase::WaitingForInput | SessionPhase::Ended => Some(false),
                _ => None,
            },
            None => Some(false),
        };
        match watch {
            Some(true) => self.start_watcher(session_id),
            Some(false) => self.stop_watcher(session_id),
            None => {}
        }
    }

    fn start_watcher(&mut self, session_id: &SessionId) {
        if self.watchers.contains_key(session_id) {
            return;
        }
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };
        let token = CancellationToken::new();
        spawn_interrupt_watcher(
            session_id.clone(),
            session.cwd.clone(),
            self.ctx.loader.resolver(),
            self.ctx.interrupt_poll,
            self.interrupts_tx.clone(),
            token.clone(),
        );
        self.watchers.insert(session_id.clone(), token);
    }

    fn stop_watcher(&mut self, session_id: &SessionId) {
        if let Some(token) = self.watchers.remove(session_id) {
            token.cancel();
        }
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn sorted_sessions(&self) -> Vec<SessionState> {
        let mut list: Vec<SessionState> = self.sessions.values().cloned().collect();
        sort_by_priority(&mut list);
        list
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.sorted_sessions());
    }
}
