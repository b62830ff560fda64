//! NDJSON event protocol
//!
//! Everything the browser sees is one of these events, one JSON object per
//! line. The gateway also parses the orchestrator child's stderr sentinels
//! into these events here, so the mapping lives in a single place.

use serde::Serialize;
use serde_json::Value;

/// Coarse run state shown in the UI status strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Thinking,
    Tools,
    Working,
    Idle,
}

/// One NDJSON event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// Status strip update
    Status { state: RunState, label: String },
    /// A complete line of stage reasoning
    Reasoning { stage: String, text: String },
    /// Token-level reasoning stream
    ReasoningStream {
        token: String,
        stage: String,
        stream_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// A tool invocation (live while running, replayed from the trace after)
    Action {
        tool: String,
        arguments: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        live: Option<bool>,
    },
    /// Progressively longer prefix of the final chat message
    ChatChunk { text: String },
    /// The final chat message
    ChatFinal { text: String },
    /// The run was cancelled
    Stopped { message: String },
    /// The run failed
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Terminal event; always the last line of a stream
    Done,
}

impl UiEvent {
    pub fn status(state: RunState, label: impl Into<String>) -> Self {
        UiEvent::Status {
            state,
            label: label.into(),
        }
    }

    /// Render as one NDJSON line (newline included)
    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\",\"message\":\"serialization failure\"}".to_string());
        line.push('\n');
        line
    }
}

/// Status event conventionally paired with a reasoning stage
fn status_for_stage(stage: &str) -> UiEvent {
    match stage {
        "planner" | "plan" => UiEvent::status(RunState::Thinking, "thinking..."),
        "reranker" => UiEvent::status(RunState::Tools, "getting tools..."),
        _ => UiEvent::status(RunState::Working, "working..."),
    }
}

/// Parse one stderr line from the orchestrator child into UI events.
///
/// Recognized sentinels: `[stream:<stage>]`, `[stream_raw:<stage>]`,
/// `[status:<scope>]`, `[response:<scope>]`, `[tool:call]`. Anything else is
/// a plain diagnostic and produces no events.
pub fn events_from_stderr_line(line: &str) -> Vec<UiEvent> {
    let line = line.trim();

    if let Some((stage, payload)) = parse_sentinel(line, "stream") {
        if payload.is_empty() {
            return vec![];
        }
        return vec![
            UiEvent::Reasoning {
                stage: stage.to_string(),
                text: payload.to_string(),
            },
            status_for_stage(stage),
        ];
    }

    if let Some((stage, payload)) = parse_sentinel(line, "stream_raw") {
        let Ok(parsed) = serde_json::from_str::<Value>(payload) else {
            return vec![];
        };
        let token = parsed
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or("chunk")
            .to_string();
        let stream_id = parsed
            .get("stream_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let text = parsed
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string);
        return vec![UiEvent::ReasoningStream {
            token,
            stage: stage.to_string(),
            stream_id,
            text,
        }];
    }

    if let Some((scope, _)) = parse_sentinel(line, "status") {
        return vec![status_for_stage(scope)];
    }

    if let Some((scope, payload)) = parse_sentinel(line, "response") {
        return vec![UiEvent::Reasoning {
            stage: scope.to_string(),
            text: payload.to_string(),
        }];
    }

    if let Some(payload) = line.strip_prefix("[tool:call]") {
        let Ok(parsed) = serde_json::from_str::<Value>(payload.trim()) else {
            return vec![];
        };
        let tool = parsed
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if tool.is_empty() {
            return vec![];
        }
        let arguments = parsed.get("arguments").cloned().unwrap_or(Value::Null);
        return vec![UiEvent::Action {
            tool,
            arguments,
            live: Some(true),
        }];
    }

    vec![]
}

/// Split `[<kind>:<scope>] payload` into `(scope, payload)`
fn parse_sentinel<'a>(line: &'a str, kind: &str) -> Option<(&'a str, &'a str)> {
    let rest = line.strip_prefix(&format!("[{kind}:"))?;
    let close = rest.find(']')?;
    let scope = &rest[..close];
    if scope.is_empty() || scope.contains(' ') {
        return None;
    }
    Some((scope, rest[close + 1..].trim()))
}
