//! Structured run traces
//!
//! Two file logs (one JSON object per line) plus the stderr sentinel
//! protocol the UI gateway parses. File logs never fail the caller: a log
//! write that errors is dropped silently.

use chrono::Utc;
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory under the workspace holding private agent logs
pub const LOG_DIR_NAME: &str = ".low-cortisol-html-logs";

/// Appender for tool-action entries under `<workspace>/.low-cortisol-html-logs/`
#[derive(Debug, Clone)]
pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    /// Log into the workspace's private log directory
    pub fn for_workspace(workspace_root: &Path) -> Self {
        ActionLog {
            path: workspace_root.join(LOG_DIR_NAME).join("tool_actions.log"),
        }
    }

    /// Record one executed tool call with its result envelope
    pub fn record(&self, tool_name: &str, arguments: &Value, result: &Value) {
        let entry = json!({
            "timestamp_utc": Utc::now().to_rfc3339(),
            "tool": tool_name,
            "arguments": arguments,
            "result_ok": result.get("ok").and_then(Value::as_bool).unwrap_or(false),
            "result": result,
        });
        append_json_line(&self.path, &entry);
    }
}

/// Appender for orchestrator-stage events (`{stage, payload}` lines)
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        EventLog { path }
    }

    /// Events log inside the workspace's private log directory
    pub fn for_workspace(workspace_root: &Path, file_name: &str) -> Self {
        EventLog {
            path: workspace_root.join(LOG_DIR_NAME).join(file_name),
        }
    }

    pub fn record(&self, stage: &str, payload: Value) {
        append_json_line(&self.path, &json!({ "stage": stage, "payload": payload }));
    }
}

fn append_json_line(path: &Path, entry: &Value) {
    if let Some(parent) = path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{entry}");
    }
}

// ---------------------------------------------------------------------------
// Stderr sentinel protocol
// ---------------------------------------------------------------------------
//
// The orchestrator child process talks to the gateway through prefixed lines
// on stderr. Tracing diagnostics go elsewhere so this channel stays parseable.

/// Reasoning text for a pipeline stage: `[stream:<stage>] <text>`
pub fn emit_stream(stage: &str, text: &str) {
    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        eprintln!("[stream:{stage}] {}", line.trim());
    }
}

/// Raw token-level streaming payload: `[stream_raw:<stage>] <json>`
pub fn emit_stream_raw(stage: &str, payload: &Value) {
    eprintln!("[stream_raw:{stage}] {payload}");
}

/// Coarse status transition: `[status:<scope>]`
pub fn emit_status(scope: &str) {
    eprintln!("[status:{scope}]");
}

/// Structured stage response: `[response:<scope>] <json>`
pub fn emit_response(scope: &str, payload: &Value) {
    eprintln!("[response:{scope}] {payload}");
}

/// Live tool invocation: `[tool:call] <json>`
pub fn emit_tool_call(payload: &Value) {
    eprintln!("[tool:call] {payload}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn action_log_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = ActionLog::for_workspace(dir.path());
        log.record(
            "create_file",
            &json!({"relative_path": "index.html"}),
            &json!({"ok": true}),
        );
        log.record("read_file", &json!({}), &json!({"ok": false}));

        let raw = std::fs::read_to_string(
            dir.path().join(LOG_DIR_NAME).join("tool_actions.log"),
        )
        .unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["tool"], "create_file");
        assert_eq!(first["result_ok"], true);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["result_ok"], false);
    }

    #[test]
    fn event_log_wraps_stage_and_payload() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::for_workspace(dir.path(), "orchestrator_events.log");
        log.record("retrieval", json!({"top_n": 8}));

        let raw = std::fs::read_to_string(
            dir.path().join(LOG_DIR_NAME).join("orchestrator_events.log"),
        )
        .unwrap();
        let entry: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(entry["stage"], "retrieval");
        assert_eq!(entry["payload"]["top_n"], 8);
    }
}
