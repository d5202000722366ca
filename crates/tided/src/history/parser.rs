//! Incremental parser for Claude Code session logs.
//!
//! A log is JSONL: one record per line, appended as the session runs.
//! The parser keeps a byte cursor and only consumes newline-terminated
//! lines, so feeding the file in any number of pieces produces the same
//! items as parsing it in one go.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use tide_core::{ChatHistoryItem, ChatItemKind, DomainError, ToolCallItem, ToolResult, ToolStatus, ToolUseId};

/// Text Claude Code records when the user interrupts a turn.
pub const INTERRUPT_MARKER: &str = "[Request interrupted by user";

/// Summary of one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseProgress {
    /// Bytes consumed from the input (complete lines only)
    pub consumed: usize,
    /// Records that changed the item list
    pub applied: usize,
    /// Complete lines that failed to decode
    pub skipped: usize,
    /// An interruption record was seen
    pub interrupted: bool,
    /// Tool calls newly linked to a subagent log, as `(tool_use_id, agent_id)`
    pub new_agent_links: Vec<(ToolUseId, String)>,
}

/// A tool result that arrived before its tool call.
#[derive(Debug, Clone)]
struct HeldResult {
    status: ToolStatus,
    result: ToolResult,
}

/// Parser state for one session log.
#[derive(Debug, Default, Clone)]
pub struct TranscriptParser {
    offset: u64,
    items: Vec<ChatHistoryItem>,
    tool_index: HashMap<ToolUseId, usize>,
    seen_uuids: HashSet<String>,
    held_results: HashMap<ToolUseId, HeldResult>,
    agent_links: HashMap<ToolUseId, String>,
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the first unconsumed byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn items(&self) -> &[ChatHistoryItem] {
        &self.items
    }

    /// Parses the complete lines of `bytes`, which must start at [`offset`](Self::offset).
    ///
    /// A trailing partial line is left unconsumed; pass it again, extended,
    /// on the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> ParseProgress {
        let mut progress = ParseProgress::default();
        let mut start = 0;

        while let Some(newline) = bytes.get(start..).and_then(|rest| rest.iter().position(|b| *b == b'\n')) {
            let end = start + newline;
            let line_offset = self.offset + start as u64;
            if let Some(line) = bytes.get(start..end) {
                self.parse_line(line, line_offset, &mut progress);
            }
            start = end + 1;
        }

        progress.consumed = start;
        self.offset += start as u64;
        progress
    }

    /// Reads whatever was appended to `path` since the last call and parses it.
    ///
    /// If the file shrank it was rewritten, so the parser starts over.
    pub fn parse_file(&mut self, path: &Path) -> std::io::Result<ParseProgress> {
        let mut file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();

        if len < self.offset {
            debug!(path = %path.display(), len, offset = self.offset, "log shrank, reparsing");
            *self = Self::new();
        }
        if len == self.offset {
            return Ok(ParseProgress::default());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)?;
        Ok(self.feed(&buf))
    }

    /// Attaches parsed subagent tool calls to the tool call that spawned them.
    pub fn attach_subagent_tools(&mut self, tool_use_id: &ToolUseId, tools: Vec<tide_core::SubagentToolCall>) {
        if let Some(tool) = self
            .tool_index
            .get(tool_use_id)
            .and_then(|idx| self.items.get_mut(*idx))
            .and_then(ChatHistoryItem::tool_call_mut)
        {
            tool.subagent_tools = tools;
        }
    }

    fn parse_line(&mut self, line: &[u8], line_offset: u64, progress: &mut ParseProgress) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }

        let record: Value = match serde_json::from_slice(line) {
            Ok(v) => v,
            Err(e) => {
                let err = DomainError::parse(format!("log line at byte {line_offset}"), e.to_string());
                warn!(error = %err, "skipping invalid log line");
                progress.skipped += 1;
                return;
            }
        };

        if let Some(uuid) = record.get("uuid").and_then(Value::as_str) {
            if !self.seen_uuids.insert(uuid.to_string()) {
                return;
            }
        }
        if record.get("isMeta").and_then(Value::as_bool) == Some(true) {
            return;
        }

        let base_id = record
            .get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("line-{line_offset}"));
        let timestamp = record
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_default();
        let content = record.get("message").and_then(|m| m.get("content"));

        match record.get("type").and_then(Value::as_str) {
            Some("user") => self.parse_user(&record, content, &base_id, timestamp, progress),
            Some("assistant") => self.parse_assistant(content, &base_id, timestamp, progress),
            _ => {}
        }
    }

    fn parse_user(
        &mut self,
        record: &Value,
        content: Option<&Value>,
        base_id: &str,
        timestamp: DateTime<Utc>,
        progress: &mut ParseProgress,
    ) {
        match content {
            Some(Value::String(text)) => {
                self.push_user_text(text, base_id.to_string(), timestamp, progress);
            }
            Some(Value::Array(blocks)) => {
                for (index, block) in blocks.iter().enumerate() {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                let id = format!("{base_id}-{index}");
                                self.push_user_text(text, id, timestamp, progress);
                            }
                        }
                        Some("tool_result") => self.apply_tool_result(record, block, progress),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn push_user_text(&mut self, text: &str, id: String, timestamp: DateTime<Utc>, progress: &mut ParseProgress) {
        let trimmed = text.trim_start();
        if trimmed.starts_with(INTERRUPT_MARKER) {
            self.items.push(ChatHistoryItem::new(id, timestamp, ChatItemKind::Interrupted));
            progress.interrupted = true;
            progress.applied += 1;
            return;
        }
        if is_command_wrapper(trimmed) || trimmed.is_empty() {
            return;
        }
        self.items
            .push(ChatHistoryItem::new(id, timestamp, ChatItemKind::User(text.to_string())));
        progress.applied += 1;
    }

    fn parse_assistant(
        &mut self,
        content: Option<&Value>,
        base_id: &str,
        timestamp: DateTime<Utc>,
        progress: &mut ParseProgress,
    ) {
        let Some(Value::Array(blocks)) = content else {
            return;
        };

        for (index, block) in blocks.iter().enumerate() {
            let id = format!("{base_id}-{index}");
            let kind = match block.get("type").and_then(Value::as_str) {
                Some("text") => match block.get("text").and_then(Value::as_str) {
                    Some(text) if !text.trim().is_empty() => ChatItemKind::Assistant(text.to_string()),
                    _ => continue,
                },
                Some("thinking") => match block.get("thinking").and_then(Value::as_str) {
                    Some(text) if !text.trim().is_empty() => ChatItemKind::Thinking(text.to_string()),
                    _ => continue,
                },
                Some("tool_use") => {
                    let Some(tool_id) = block.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    let tool_id = ToolUseId::new(tool_id);
                    if self.tool_index.contains_key(&tool_id) {
                        continue;
                    }
                    let name = block.get("name").and_then(Value::as_str).unwrap_or("unknown");
                    let mut tool = ToolCallItem::running(tool_id.clone(), name, tool_input(block));
                    if let Some(held) = self.held_results.remove(&tool_id) {
                        tool.status = held.status;
                        tool.result = Some(held.result);
                    }
                    self.tool_index.insert(tool_id, self.items.len());
                    ChatItemKind::ToolCall(tool)
                }
                _ => continue,
            };
            self.items.push(ChatHistoryItem::new(id, timestamp, kind));
            progress.applied += 1;
        }
    }

    fn apply_tool_result(&mut self, record: &Value, block: &Value, progress: &mut ParseProgress) {
        let Some(tool_id) = block.get("tool_use_id").and_then(Value::as_str) else {
            return;
        };
        let tool_id = ToolUseId::new(tool_id);
        let text = result_text(block);

        let status = if text.trim_start().starts_with(INTERRUPT_MARKER) {
            ToolStatus::Interrupted
        } else if block.get("is_error").and_then(Value::as_bool) == Some(true) {
            ToolStatus::Error
        } else {
            ToolStatus::Success
        };

        let structured = record.get("toolUseResult").filter(|v| v.is_object());
        if let Some(agent_id) = structured
            .and_then(|v| v.get("agentId"))
            .and_then(Value::as_str)
        {
            if !self.agent_links.contains_key(&tool_id) {
                self.agent_links.insert(tool_id.clone(), agent_id.to_string());
                progress.new_agent_links.push((tool_id.clone(), agent_id.to_string()));
            }
        }
        let result = match structured {
            Some(v) => ToolResult::Structured(v.clone()),
            None => ToolResult::Text(text),
        };

        match self
            .tool_index
            .get(&tool_id)
            .and_then(|idx| self.items.get_mut(*idx))
            .and_then(ChatHistoryItem::tool_call_mut)
        {
            Some(tool) => {
                tool.status = status;
                tool.result = Some(result);
                progress.applied += 1;
            }
            None => {
                debug!(tool_use_id = %tool_id, "holding result for unseen tool call");
                self.held_results.insert(tool_id, HeldResult { status, result });
            }
        }
    }
}

/// Returns true if a decoded record is a user interruption.
pub fn is_interruption_record(record: &Value) -> bool {
    if record.get("type").and_then(Value::as_str) != Some("user") {
        return false;
    }
    match record.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(text)) => text.trim_start().starts_with(INTERRUPT_MARKER),
        Some(Value::Array(blocks)) => blocks.iter().any(|block| {
            let text = match block.get("type").and_then(Value::as_str) {
                Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
                Some("tool_result") => Some(result_text(block)),
                _ => None,
            };
            text.is_some_and(|t| t.trim_start().starts_with(INTERRUPT_MARKER))
        }),
        _ => false,
    }
}

/// Slash-command and local-command wrappers are not conversation.
fn is_command_wrapper(text: &str) -> bool {
    text.starts_with("<command-") || text.starts_with("<local-command")
}

/// Extracts the text of a `tool_result` block (string or text-block array).
pub(crate) fn result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Input object of a `tool_use` block.
pub(crate) fn tool_input(block: &Value) -> Map<String, Value> {
    block
        .get("input")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}
