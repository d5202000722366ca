//! Subagent logs.
//!
//! A `Task` tool call delegates to a subagent whose own conversation lives
//! in `agent-<id>.jsonl` next to the session log. Only its tool calls are
//! surfaced, nested under the spawning call.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use tide_core::{SubagentToolCall, ToolStatus, ToolUseId};

use super::parser::{result_text, tool_input, INTERRUPT_MARKER};

struct Outcome {
    text: String,
    is_error: bool,
}

/// Reads a subagent log. A missing or unreadable file yields no tools.
pub fn load_subagent_tools(path: &Path) -> Vec<SubagentToolCall> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_subagent_tools(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "subagent log unavailable");
            Vec::new()
        }
    }
}

/// Extracts tool calls from subagent log content, in log order.
pub fn parse_subagent_tools(content: &str) -> Vec<SubagentToolCall> {
    let records: Vec<Value> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();

    // Results first so each call can be completed as it is built
    let mut outcomes: HashMap<&str, Outcome> = HashMap::new();
    for record in records.iter().filter(|r| record_type(r) == Some("user")) {
        for block in content_blocks(record) {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                outcomes.insert(
                    id,
                    Outcome {
                        text: result_text(block),
                        is_error: block.get("is_error").and_then(Value::as_bool) == Some(true),
                    },
                );
            }
        }
    }

    let mut tools = Vec::new();
    for record in records.iter().filter(|r| record_type(r) == Some("assistant")) {
        for block in content_blocks(record) {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }
            let (Some(id), Some(name)) = (
                block.get("id").and_then(Value::as_str),
                block.get("name").and_then(Value::as_str),
            ) else {
                continue;
            };

            let outcome = outcomes.get(id);
            let status = match outcome {
                None => ToolStatus::Running,
                Some(o) if o.text.trim_start().starts_with(INTERRUPT_MARKER) => ToolStatus::Interrupted,
                Some(o) if o.is_error => ToolStatus::Error,
                Some(_) => ToolStatus::Success,
            };

            tools.push(SubagentToolCall {
                tool_use_id: ToolUseId::new(id),
                name: name.to_string(),
                input: tool_input(block),
                status,
                result_text: outcome.map(|o| o.text.clone()),
            });
        }
    }
    tools
}

fn record_type(record: &Value) -> Option<&str> {
    record.get("type").and_then(Value::as_str)
}

fn content_blocks(record: &Value) -> &[Value] {
    record
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_tools_with_results() {
        let content = [
            json!({"type": "user", "message": {"content": "explore the repo"}}),
            json!({"type": "assistant", "uuid": "a1", "message": {"content": [
                {"type": "tool_use", "id": "s1", "name": "Glob", "input": {"pattern": "**/*.rs"}},
                {"type": "tool_use", "id": "s2", "name": "Read", "input": {"file_path": "/x"}}
            ]}}),
            json!({"type": "user", "message": {"content": [
                {"type": "tool_result", "tool_use_id": "s1", "content": "src/lib.rs"},
                {"type": "tool_result", "tool_use_id": "s2", "is_error": true,
                 "content": [{"type": "text", "text": "missing"}]}
            ]}}),
            json!({"type": "assistant", "uuid": "a2", "message": {"content": [
                {"type": "tool_use", "id": "s3", "name": "Grep", "input": {"pattern": "fn main"}}
            ]}}),
        ]
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");

        let tools = parse_subagent_tools(&content);
        assert_eq!(tools.len(), 3);
        assert_eq!(tools[0].name, "Glob");
        assert_eq!(tools[0].status, ToolStatus::Success);
        assert_eq!(tools[0].result_text.as_deref(), Some("src/lib.rs"));
        assert_eq!(tools[1].status, ToolStatus::Error);
        assert_eq!(tools[2].status, ToolStatus::Running);
        assert!(tools[2].result_text.is_none());
    }

    #[test]
    fn test_garbage_lines_ignored() {
        assert!(parse_subagent_tools("not json\n\n{}\n").is_empty());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_subagent_tools(Path::new("/nonexistent/agent-x.jsonl")).is_empty());
    }
}
