//! Conversation history.
//!
//! Locates session logs, parses them incrementally and attaches subagent
//! tool calls. Loading is blocking file I/O and runs off the engine task;
//! the engine hands a session's parser to [`HistoryLoader::load_local`]
//! and takes it back with the outcome.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use tide_core::{ChatHistoryItem, SessionId};

pub mod interrupt;
pub mod parser;
pub mod paths;
pub mod subagent;

pub use interrupt::{spawn_interrupt_watcher, InterruptScanner};
pub use parser::{is_interruption_record, ParseProgress, TranscriptParser, INTERRUPT_MARKER};
pub use paths::{escape_project_dir, remote_log_path, subagent_log_path, LogPathResolver};
pub use subagent::{load_subagent_tools, parse_subagent_tools};

/// Path resolver shared by loads and interrupt watchers.
pub type SharedResolver = Arc<Mutex<LogPathResolver>>;

/// Result of one load attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult {
    /// The parser consumed new records; the full item list follows
    Updated(Vec<ChatHistoryItem>),
    /// Nothing new since the last load
    Unchanged,
    /// No log exists for the session (yet)
    NotFound,
    Failed(String),
}

/// A finished load, carrying the parser back to its owner.
#[derive(Debug)]
pub struct LoadOutcome {
    pub session_id: SessionId,
    pub parser: TranscriptParser,
    pub result: LoadResult,
}

/// Loads local session logs.
#[derive(Debug, Clone)]
pub struct HistoryLoader {
    resolver: SharedResolver,
}

impl HistoryLoader {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            resolver: Arc::new(Mutex::new(LogPathResolver::new(projects_root))),
        }
    }

    pub fn resolver(&self) -> SharedResolver {
        Arc::clone(&self.resolver)
    }

    pub fn resolve(&self, cwd: &str, session_id: &SessionId) -> Option<PathBuf> {
        self.resolver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(cwd, session_id)
    }

    pub fn forget(&self, session_id: &SessionId) {
        self.resolver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .forget(session_id);
    }

    /// Parses whatever was appended to the session log since `parser` last ran.
    ///
    /// Blocking; call from `spawn_blocking`.
    pub fn load_local(&self, session_id: SessionId, cwd: &str, mut parser: TranscriptParser) -> LoadOutcome {
        let Some(path) = self.resolve(cwd, &session_id) else {
            debug!(session_id = %session_id, cwd, "no log for session");
            return LoadOutcome {
                session_id,
                parser,
                result: LoadResult::NotFound,
            };
        };

        let progress = match parser.parse_file(&path) {
            Ok(p) => p,
            Err(e) => {
                warn!(session_id = %session_id, path = %path.display(), error = %e, "failed to read log");
                return LoadOutcome {
                    session_id,
                    parser,
                    result: LoadResult::Failed(e.to_string()),
                };
            }
        };

        for (tool_use_id, agent_id) in &progress.new_agent_links {
            if let Some(agent_log) = subagent_log_path(&path, agent_id) {
                parser.attach_subagent_tools(tool_use_id, load_subagent_tools(&agent_log));
            }
        }

        let result = if progress.applied == 0 && progress.new_agent_links.is_empty() {
            LoadResult::Unchanged
        } else {
            debug!(
                session_id = %session_id,
                applied = progress.applied,
                skipped = progress.skipped,
                items = parser.items().len(),
                "parsed log"
            );
            LoadResult::Updated(parser.items().to_vec())
        };

        LoadOutcome {
            session_id,
            parser,
            result,
        }
    }
}

/// Parses a complete log fetched in one piece (remote sessions).
pub fn parse_full(content: &str) -> Vec<ChatHistoryItem> {
    let mut parser = TranscriptParser::new();
    if content.ends_with('\n') {
        parser.feed(content.as_bytes());
    } else {
        // A fetched snapshot may end without a newline; the last record is still whole
        parser.feed(format!("{content}\n").as_bytes());
    }
    parser.items().to_vec()
}
