//! Correlates permission requests with the tool call they gate.
//!
//! Claude Code's `PermissionRequest` hook carries no `tool_use_id`, but it
//! immediately follows the `PreToolUse` of the same call with an identical
//! tool name and input. Ids from `PreToolUse` are queued per
//! `(session, tool, input)` and popped in FIFO order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use tide_core::{SessionId, ToolUseId};

type CacheKey = (SessionId, String, String);

#[derive(Default)]
pub struct ToolUseIdCache {
    entries: Mutex<HashMap<CacheKey, VecDeque<ToolUseId>>>,
}

impl ToolUseIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(session_id: &SessionId, tool_name: &str, input: Option<&Map<String, Value>>) -> CacheKey {
        // serde_json maps are ordered by key, so equal inputs serialize identically
        let canonical = input
            .map(|m| Value::Object(m.clone()).to_string())
            .unwrap_or_default();
        (session_id.clone(), tool_name.to_string(), canonical)
    }

    /// Queues the id of a `PreToolUse`.
    pub fn remember(
        &self,
        session_id: &SessionId,
        tool_name: &str,
        input: Option<&Map<String, Value>>,
        tool_use_id: ToolUseId,
    ) {
        trace!(session_id = %session_id, tool = tool_name, tool_use_id = %tool_use_id, "caching tool use id");
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(Self::key(session_id, tool_name, input))
            .or_default()
            .push_back(tool_use_id);
    }

    /// Pops the oldest id queued for this call.
    pub fn take(&self, session_id: &SessionId, tool_name: &str, input: Option<&Map<String, Value>>) -> Option<ToolUseId> {
        let key = Self::key(session_id, tool_name, input);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let queue = entries.get_mut(&key)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            entries.remove(&key);
        }
        if let Some(id) = &id {
            debug!(session_id = %session_id, tool = tool_name, tool_use_id = %id, "correlated permission request");
        }
        id
    }

    /// Drops an id once its tool call has finished.
    pub fn forget(&self, session_id: &SessionId, tool_use_id: &ToolUseId) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|(session, _, _), queue| {
            if session == session_id {
                queue.retain(|id| id != tool_use_id);
            }
            !queue.is_empty()
        });
    }

    /// Drops every id of a session.
    pub fn clear_session(&self, session_id: &SessionId) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(session, _, _), _| session != session_id);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_fifo_per_call() {
        let cache = ToolUseIdCache::new();
        let s = SessionId::new("s1");
        let cmd = input(json!({"command": "ls", "description": "list"}));

        cache.remember(&s, "Bash", Some(&cmd), ToolUseId::new("t1"));
        cache.remember(&s, "Bash", Some(&cmd), ToolUseId::new("t2"));

        // Key order in the incoming input does not matter
        let reordered = input(json!({"description": "list", "command": "ls"}));
        assert_eq!(cache.take(&s, "Bash", Some(&reordered)), Some(ToolUseId::new("t1")));
        assert_eq!(cache.take(&s, "Bash", Some(&cmd)), Some(ToolUseId::new("t2")));
        assert_eq!(cache.take(&s, "Bash", Some(&cmd)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_different_input_does_not_match() {
        let cache = ToolUseIdCache::new();
        let s = SessionId::new("s1");
        cache.remember(&s, "Bash", Some(&input(json!({"command": "ls"}))), ToolUseId::new("t1"));
        assert_eq!(cache.take(&s, "Bash", Some(&input(json!({"command": "rm"})))), None);
        assert_eq!(cache.take(&SessionId::new("s2"), "Bash", Some(&input(json!({"command": "ls"})))), None);
    }

    #[test]
    fn test_forget_and_clear() {
        let cache = ToolUseIdCache::new();
        let s = SessionId::new("s1");
        cache.remember(&s, "Read", None, ToolUseId::new("t1"));
        cache.remember(&s, "Read", None, ToolUseId::new("t2"));
        cache.remember(&SessionId::new("s2"), "Read", None, ToolUseId::new("t3"));

        cache.forget(&s, &ToolUseId::new("t1"));
        assert_eq!(cache.len(), 2);

        cache.clear_session(&s);
        assert_eq!(cache.len(), 1);
    }
}
