//! Locating a session's conversation log.
//!
//! Claude Code stores each session at
//! `<projects-root>/<escaped-cwd>/<session-id>.jsonl`, where the working
//! directory is escaped by replacing `/`, `.` and `_` with `-`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tide_core::SessionId;
use tracing::{debug, trace};

/// Log file extension.
pub const LOG_EXTENSION: &str = "jsonl";

/// Escapes a working directory into its project directory name.
///
/// Lossy and idempotent: `/a.b_c` and `-a-b-c` escape to the same name.
pub fn escape_project_dir(cwd: &str) -> String {
    cwd.chars()
        .map(|c| match c {
            '/' | '.' | '_' => '-',
            other => other,
        })
        .collect()
}

/// Path of a session log relative to a home directory, used on remote hosts.
pub fn remote_log_path(cwd: &str, session_id: &SessionId) -> String {
    format!(
        ".claude/projects/{}/{}.{}",
        escape_project_dir(cwd),
        session_id,
        LOG_EXTENSION
    )
}

/// Path of a subagent log next to the session log.
pub fn subagent_log_path(session_log: &Path, agent_id: &str) -> Option<PathBuf> {
    session_log
        .parent()
        .map(|dir| dir.join(format!("agent-{agent_id}.{LOG_EXTENSION}")))
}

/// Resolves and caches session log paths under a projects root.
#[derive(Debug)]
pub struct LogPathResolver {
    projects_root: PathBuf,
    cache: HashMap<SessionId, PathBuf>,
}

impl LogPathResolver {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// The path the log would have if `cwd` is the project directory.
    pub fn expected_path(&self, cwd: &str, session_id: &SessionId) -> PathBuf {
        self.projects_root
            .join(escape_project_dir(cwd))
            .join(format!("{session_id}.{LOG_EXTENSION}"))
    }

    /// Finds the log for a session.
    ///
    /// Tries the cwd, then each parent directory, then scans every project
    /// directory. The first hit is cached for the life of the session id.
    pub fn resolve(&mut self, cwd: &str, session_id: &SessionId) -> Option<PathBuf> {
        if let Some(path) = self.cache.get(session_id) {
            return Some(path.clone());
        }

        let found = self
            .search_ancestors(cwd, session_id)
            .or_else(|| self.scan(session_id))?;

        debug!(session_id = %session_id, path = %found.display(), "resolved session log");
        self.cache.insert(session_id.clone(), found.clone());
        Some(found)
    }

    fn search_ancestors(&self, cwd: &str, session_id: &SessionId) -> Option<PathBuf> {
        Path::new(cwd).ancestors().find_map(|dir| {
            let candidate = self.expected_path(&dir.to_string_lossy(), session_id);
            trace!(candidate = %candidate.display(), "checking log path");
            candidate.is_file().then_some(candidate)
        })
    }

    fn scan(&self, session_id: &SessionId) -> Option<PathBuf> {
        let file_name = format!("{session_id}.{LOG_EXTENSION}");
        let entries = std::fs::read_dir(&self.projects_root).ok()?;
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        // Stable order so duplicates always resolve the same way
        dirs.sort();
        dirs.into_iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }

    /// Drops the cached path of an archived session.
    pub fn forget(&mut self, session_id: &SessionId) {
        self.cache.remove(session_id);
    }
}
