//! Integration tests for the session engine.
//!
//! These drive the engine through its handle with a recording command
//! runner standing in for tmux and ssh, and real log files on disk.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

use tide_core::{
    ChatItemKind, HookEvent, HookEventType, HookStatus, SessionId, SessionPhase, SessionState,
    ToolUseId,
};
use tide_tmux::{CommandOutput, CommandRunner, PaneLocator, TmuxTarget};
use tided::approval::ApprovalDecision;
use tided::config::DaemonConfig;
use tided::engine::{spawn_engine, EngineContext, EngineError, EngineHandle};
use tided::history::LogPathResolver;
use tided::ingest::PendingPermissions;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for the engine to reach a state
const STATE_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval between state checks
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll interval for interrupt watchers in these tests
const INTERRUPT_POLL_MS: u64 = 20;

const LOCAL_PID: u32 = 4242;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Call {
    host: Option<String>,
    program: String,
    args: Vec<String>,
}

/// Records every command; `cat` returns the scripted remote log.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    remote_log: Mutex<String>,
    /// How long each tmux command takes after it is recorded
    tmux_delay: Mutex<Duration>,
}

impl RecordingRunner {
    fn set_remote_log(&self, content: &str) {
        *self.remote_log.lock().unwrap() = content.to_string();
    }

    fn set_tmux_delay(&self, delay: Duration) {
        *self.tmux_delay.lock().unwrap() = delay;
    }

    fn calls_to(&self, program: &str) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, host: Option<&str>, program: &str, args: &[String]) -> tide_tmux::Result<CommandOutput> {
        self.calls.lock().unwrap().push(Call {
            host: host.map(str::to_string),
            program: program.to_string(),
            args: args.to_vec(),
        });
        if program == "tmux" {
            let delay = *self.tmux_delay.lock().unwrap();
            sleep(delay).await;
        }
        match program {
            "cat" => Ok(CommandOutput::success(self.remote_log.lock().unwrap().clone())),
            _ => Ok(CommandOutput::success("")),
        }
    }
}

/// Knows a single pane, owned by `LOCAL_PID`.
struct OnePane;

#[async_trait]
impl PaneLocator for OnePane {
    async fn find_by_pid(&self, pid: u32) -> tide_tmux::Result<Option<TmuxTarget>> {
        Ok((pid == LOCAL_PID).then(|| TmuxTarget::pane("work", 0, 1)))
    }

    async fn find_by_tty(&self, _: &str) -> tide_tmux::Result<Option<TmuxTarget>> {
        Ok(None)
    }
}

struct TestEngine {
    engine: EngineHandle,
    runner: Arc<RecordingRunner>,
    projects_root: PathBuf,
    _temp_dir: TempDir,
}

impl TestEngine {
    fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let projects_root = temp_dir.path().join("projects");
        std::fs::create_dir_all(&projects_root).unwrap();

        let config = DaemonConfig {
            socket_path: temp_dir.path().join("unused.sock"),
            projects_root: projects_root.clone(),
            interrupt_poll_ms: INTERRUPT_POLL_MS,
            ..DaemonConfig::default()
        };

        let runner = Arc::new(RecordingRunner::default());
        let engine = spawn_engine(EngineContext::new(
            &config,
            Arc::new(PendingPermissions::new()),
            runner.clone(),
            Arc::new(OnePane),
        ));

        TestEngine {
            engine,
            runner,
            projects_root,
            _temp_dir: temp_dir,
        }
    }

    /// Path the engine will look for this session's log at.
    fn log_path(&self, cwd: &str, session_id: &str) -> PathBuf {
        let path = LogPathResolver::new(&self.projects_root).expected_path(cwd, &SessionId::new(session_id));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        path
    }

    /// Waits until at least `count` commands to `program` have been recorded.
    async fn wait_for_calls(&self, program: &str, count: usize) -> Vec<Call> {
        let start = tokio::time::Instant::now();
        loop {
            let calls = self.runner.calls_to(program);
            if calls.len() >= count {
                return calls;
            }
            assert!(
                start.elapsed() < STATE_WAIT_TIMEOUT,
                "expected {count} {program} calls, saw {}",
                calls.len()
            );
            sleep(STATE_POLL_INTERVAL).await;
        }
    }

    async fn wait_for<F>(&self, session_id: &str, check: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        let id = SessionId::new(session_id);
        let start = tokio::time::Instant::now();
        loop {
            if let Some(session) = self.engine.session(id.clone()).await {
                if check(&session) {
                    return session;
                }
            }
            assert!(
                start.elapsed() < STATE_WAIT_TIMEOUT,
                "session {session_id} did not reach the expected state"
            );
            sleep(STATE_POLL_INTERVAL).await;
        }
    }
}

fn event(session_id: &str, cwd: &str, kind: HookEventType, status: HookStatus) -> HookEvent {
    HookEvent::new(SessionId::new(session_id), cwd, kind, status)
}

fn local_prompt_request(session_id: &str) -> HookEvent {
    let mut e = event(
        session_id,
        "/tmp/project",
        HookEventType::PermissionRequest,
        HookStatus::WaitingForApproval,
    );
    e.pid = Some(LOCAL_PID);
    e.tool_name = Some("Bash".to_string());
    e
}

fn append(path: &Path, lines: &[serde_json::Value]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn user_line(uuid: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "user",
        "uuid": uuid,
        "timestamp": "2026-01-05T10:00:00Z",
        "message": {"role": "user", "content": text}
    })
}

fn tmux_args(calls: &[Call]) -> Vec<Vec<String>> {
    calls.iter().map(|c| c.args.clone()).collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Approvals
// ============================================================================

#[tokio::test]
async fn test_keystroke_approval_types_into_pane() {
    let t = TestEngine::spawn();
    t.engine.process(local_prompt_request("s-keys")).await.unwrap();
    t.wait_for("s-keys", |s| s.phase.is_waiting_for_approval()).await;

    let delivered = t
        .engine
        .approve(SessionId::new("s-keys"), ApprovalDecision::ApproveOnce)
        .await
        .unwrap();
    assert!(delivered);

    let calls = t.runner.calls_to("tmux");
    assert_eq!(
        tmux_args(&calls),
        vec![
            strings(&["send-keys", "-t", "work:0.1", "-l", "1"]),
            strings(&["send-keys", "-t", "work:0.1", "Enter"]),
        ]
    );
    assert!(calls.iter().all(|c| c.host.is_none()));

    t.wait_for("s-keys", |s| s.phase == SessionPhase::Processing).await;
}

#[tokio::test]
async fn test_keystroke_deny_types_reason() {
    let t = TestEngine::spawn();
    t.engine.process(local_prompt_request("s-deny")).await.unwrap();
    t.wait_for("s-deny", |s| s.phase.is_waiting_for_approval()).await;

    let delivered = t
        .engine
        .approve(SessionId::new("s-deny"), ApprovalDecision::deny("use cargo"))
        .await
        .unwrap();
    assert!(delivered);

    assert_eq!(
        tmux_args(&t.runner.calls_to("tmux")),
        vec![
            strings(&["send-keys", "-t", "work:0.1", "-l", "3"]),
            strings(&["send-keys", "-t", "work:0.1", "Enter"]),
            strings(&["send-keys", "-t", "work:0.1", "-l", "use cargo"]),
            strings(&["send-keys", "-t", "work:0.1", "Enter"]),
        ]
    );
}

#[tokio::test]
async fn test_keystroke_approval_without_pane_fails() {
    let t = TestEngine::spawn();
    let mut request = local_prompt_request("s-nopane");
    request.pid = Some(7);
    t.engine.process(request).await.unwrap();
    t.wait_for("s-nopane", |s| s.phase.is_waiting_for_approval()).await;

    let delivered = t
        .engine
        .approve(SessionId::new("s-nopane"), ApprovalDecision::ApproveOnce)
        .await
        .unwrap();
    assert!(!delivered);
    assert!(t.runner.calls_to("tmux").is_empty());

    let session = t.engine.session(SessionId::new("s-nopane")).await.unwrap();
    assert!(session.phase.is_waiting_for_approval());
}

#[tokio::test]
async fn test_remote_keystrokes_go_through_host() {
    let t = TestEngine::spawn();
    let mut request = local_prompt_request("s-remote-keys");
    request.pid = None;
    request.remote_host = Some("devbox".to_string());
    request.tmux_target = Some("agents:2.0".to_string());
    t.engine.process(request).await.unwrap();
    t.wait_for("s-remote-keys", |s| s.phase.is_waiting_for_approval()).await;

    let delivered = t
        .engine
        .approve(SessionId::new("s-remote-keys"), ApprovalDecision::ApproveAlways)
        .await
        .unwrap();
    assert!(delivered);

    let calls = t.runner.calls_to("tmux");
    assert_eq!(
        tmux_args(&calls),
        vec![
            strings(&["send-keys", "-t", "agents:2.0", "-l", "2"]),
            strings(&["send-keys", "-t", "agents:2.0", "Enter"]),
        ]
    );
    assert!(calls.iter().all(|c| c.host.as_deref() == Some("devbox")));
}

#[tokio::test]
async fn test_stop_during_typing_withholds_remaining_keys() {
    let t = TestEngine::spawn();
    t.runner.set_tmux_delay(Duration::from_millis(100));
    t.engine.process(local_prompt_request("s-race")).await.unwrap();
    t.wait_for("s-race", |s| s.phase.is_waiting_for_approval()).await;

    let engine = t.engine.clone();
    let approval = tokio::spawn(async move {
        engine
            .approve(SessionId::new("s-race"), ApprovalDecision::deny("use cargo"))
            .await
    });

    // The "3" is on its way when the turn ends
    t.wait_for_calls("tmux", 1).await;
    t.engine
        .process(event("s-race", "/tmp/project", HookEventType::Stop, HookStatus::WaitingForInput))
        .await
        .unwrap();

    let delivered = approval.await.unwrap().unwrap();
    assert!(!delivered);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(
        tmux_args(&t.runner.calls_to("tmux")),
        vec![strings(&["send-keys", "-t", "work:0.1", "-l", "3"])]
    );
    let session = t.engine.session(SessionId::new("s-race")).await.unwrap();
    assert_eq!(session.phase, SessionPhase::WaitingForInput);
}

#[tokio::test]
async fn test_new_prompt_allows_next_approval() {
    let t = TestEngine::spawn();
    t.engine.process(local_prompt_request("s-next")).await.unwrap();
    t.wait_for("s-next", |s| s.phase.is_waiting_for_approval()).await;
    assert!(t
        .engine
        .approve(SessionId::new("s-next"), ApprovalDecision::ApproveOnce)
        .await
        .unwrap());

    t.engine.process(local_prompt_request("s-next")).await.unwrap();
    t.wait_for("s-next", |s| s.phase.is_waiting_for_approval()).await;
    assert!(t
        .engine
        .approve(SessionId::new("s-next"), ApprovalDecision::ApproveOnce)
        .await
        .unwrap());
    assert_eq!(t.runner.calls_to("tmux").len(), 4);
}

#[tokio::test]
async fn test_approve_unknown_session() {
    let t = TestEngine::spawn();
    let result = t
        .engine
        .approve(SessionId::new("missing"), ApprovalDecision::ApproveOnce)
        .await;
    assert_eq!(result, Err(EngineError::SessionNotFound(SessionId::new("missing"))));
}

#[tokio::test]
async fn test_stale_permission_failure_is_ignored() {
    let t = TestEngine::spawn();
    let mut request = local_prompt_request("s-stale");
    request.tool_use_id = Some(ToolUseId::new("toolu_current"));
    t.engine.process(request).await.unwrap();
    t.wait_for("s-stale", |s| s.phase.is_waiting_for_approval()).await;

    t.engine
        .permission_failed(SessionId::new("s-stale"), ToolUseId::new("toolu_old"))
        .await
        .unwrap();
    let session = t.engine.session(SessionId::new("s-stale")).await.unwrap();
    assert!(session.phase.is_waiting_for_approval());

    t.engine
        .permission_failed(SessionId::new("s-stale"), ToolUseId::new("toolu_current"))
        .await
        .unwrap();
    t.wait_for("s-stale", |s| s.phase == SessionPhase::Idle).await;
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_local_history_loaded_after_hook() {
    let t = TestEngine::spawn();
    let path = t.log_path("/tmp/project", "s-local");
    append(&path, &[user_line("u1", "fix the build")]);

    t.engine
        .process(event("s-local", "/tmp/project", HookEventType::UserPromptSubmit, HookStatus::Processing))
        .await
        .unwrap();

    let session = t.wait_for("s-local", |s| s.history_loaded).await;
    assert_eq!(session.chat_items.len(), 1);
    assert_eq!(session.chat_items[0].kind, ChatItemKind::User("fix the build".to_string()));
    assert_eq!(session.last_message.as_deref(), Some("fix the build"));

    // Appended records are picked up on the next load
    append(&path, &[user_line("u2", "and run the tests")]);
    t.engine.load_history(SessionId::new("s-local")).await.unwrap();
    let session = t.wait_for("s-local", |s| s.chat_items.len() == 2).await;
    assert_eq!(session.last_message.as_deref(), Some("and run the tests"));
}

#[tokio::test]
async fn test_load_history_unknown_session() {
    let t = TestEngine::spawn();
    let result = t.engine.load_history(SessionId::new("nope")).await;
    assert_eq!(result, Err(EngineError::SessionNotFound(SessionId::new("nope"))));
}

#[tokio::test]
async fn test_remote_history_empty_then_loaded() {
    let t = TestEngine::spawn();
    let mut prompt = event("s-remote", "/home/dev/app", HookEventType::UserPromptSubmit, HookStatus::Processing);
    prompt.remote_host = Some("devbox".to_string());
    prompt.tmux_target = Some("agents:1.0".to_string());
    t.engine.process(prompt).await.unwrap();

    let start = tokio::time::Instant::now();
    while t.runner.calls_to("cat").is_empty() {
        assert!(start.elapsed() < STATE_WAIT_TIMEOUT, "remote log never fetched");
        sleep(STATE_POLL_INTERVAL).await;
    }
    let fetch = &t.runner.calls_to("cat")[0];
    assert_eq!(fetch.host.as_deref(), Some("devbox"));
    assert_eq!(fetch.args, strings(&[".claude/projects/-home-dev-app/s-remote.jsonl"]));

    // An empty remote log leaves history unloaded
    sleep(Duration::from_millis(50)).await;
    let session = t.engine.session(SessionId::new("s-remote")).await.unwrap();
    assert!(!session.history_loaded);

    t.runner
        .set_remote_log(&format!("{}\n", user_line("r1", "deploy it")));
    t.engine.load_history(SessionId::new("s-remote")).await.unwrap();

    let session = t.wait_for("s-remote", |s| s.history_loaded).await;
    assert_eq!(session.chat_items.len(), 1);
    assert_eq!(session.last_message.as_deref(), Some("deploy it"));
}

#[tokio::test]
async fn test_remote_log_path_survives_cwd_change() {
    let t = TestEngine::spawn();
    let remote = |kind, cwd: &str, status| {
        let mut e = event("s-cd", cwd, kind, status);
        e.remote_host = Some("devbox".to_string());
        e.tmux_target = Some("agents:1.0".to_string());
        e
    };

    t.engine
        .process(remote(HookEventType::UserPromptSubmit, "/home/dev/app", HookStatus::Processing))
        .await
        .unwrap();
    t.wait_for_calls("cat", 1).await;

    // The agent ran `cd sub`; its log stays under the launch directory
    t.engine
        .process(remote(HookEventType::Stop, "/home/dev/app/sub", HookStatus::WaitingForInput))
        .await
        .unwrap();
    let session = t.wait_for("s-cd", |s| s.phase == SessionPhase::WaitingForInput).await;
    assert_eq!(session.cwd, "/home/dev/app/sub");

    t.engine.load_history(SessionId::new("s-cd")).await.unwrap();
    t.wait_for_calls("cat", 2).await;
    sleep(Duration::from_millis(50)).await;

    for fetch in t.runner.calls_to("cat") {
        assert_eq!(fetch.args, strings(&[".claude/projects/-home-dev-app/s-cd.jsonl"]));
    }
}

// ============================================================================
// Interrupts
// ============================================================================

#[tokio::test]
async fn test_interrupt_returns_session_to_idle() {
    let t = TestEngine::spawn();
    let path = t.log_path("/tmp/project", "s-int");
    append(&path, &[user_line("u1", "refactor everything")]);

    t.engine
        .process(event("s-int", "/tmp/project", HookEventType::UserPromptSubmit, HookStatus::Processing))
        .await
        .unwrap();
    t.wait_for("s-int", |s| s.phase == SessionPhase::Processing && s.history_loaded)
        .await;

    // Let the watcher take its first look before the interruption lands
    sleep(Duration::from_millis(INTERRUPT_POLL_MS * 5)).await;
    append(&path, &[user_line("u2", "[Request interrupted by user]")]);

    let session = t.wait_for("s-int", |s| s.phase == SessionPhase::Idle).await;
    assert_eq!(session.session_id.as_str(), "s-int");
    t.wait_for("s-int", |s| {
        s.chat_items
            .iter()
            .any(|item| item.kind == ChatItemKind::Interrupted)
    })
    .await;
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_archive_removes_session() {
    let t = TestEngine::spawn();
    t.engine
        .process(event("s-arch", "/tmp/project", HookEventType::SessionStart, HookStatus::WaitingForInput))
        .await
        .unwrap();
    t.wait_for("s-arch", |s| s.phase == SessionPhase::Idle).await;

    t.engine.archive(SessionId::new("s-arch")).await.unwrap();
    assert!(t.engine.session(SessionId::new("s-arch")).await.is_none());
    assert_eq!(
        t.engine.archive(SessionId::new("s-arch")).await,
        Err(EngineError::SessionNotFound(SessionId::new("s-arch")))
    );
}

#[tokio::test]
async fn test_snapshot_orders_waiting_sessions_first() {
    let t = TestEngine::spawn();
    let mut rx = t.engine.subscribe();

    t.engine
        .process(event("s-idle", "/tmp/a", HookEventType::SessionStart, HookStatus::WaitingForInput))
        .await
        .unwrap();
    t.engine
        .process(event("s-done", "/tmp/b", HookEventType::Stop, HookStatus::WaitingForInput))
        .await
        .unwrap();
    t.engine.process(local_prompt_request("s-ask")).await.unwrap();
    t.wait_for("s-ask", |s| s.phase.is_waiting_for_approval()).await;

    rx.changed().await.unwrap();
    let ids: Vec<String> = rx
        .borrow_and_update()
        .iter()
        .map(|s| s.session_id.to_string())
        .collect();
    assert_eq!(ids, vec!["s-ask", "s-done", "s-idle"]);

    let all = t.engine.sessions().await;
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].session_id.as_str(), "s-ask");
}

#[tokio::test]
async fn test_session_end_is_terminal() {
    let t = TestEngine::spawn();
    t.engine
        .process(event("s-end", "/tmp/project", HookEventType::SessionEnd, HookStatus::Ended))
        .await
        .unwrap();
    t.wait_for("s-end", |s| s.phase == SessionPhase::Ended).await;

    t.engine
        .process(event("s-end", "/tmp/project", HookEventType::UserPromptSubmit, HookStatus::Processing))
        .await
        .unwrap();
    // Metadata-only update; the phase cannot leave Ended
    sleep(Duration::from_millis(50)).await;
    let session = t.engine.session(SessionId::new("s-end")).await.unwrap();
    assert_eq!(session.phase, SessionPhase::Ended);
}
