//! Free-form model output parsing
//!
//! Local models wrap tool invocations in think-tags, fenced code blocks, or
//! bare JSON prose instead of the structured `tool_calls` field. Extraction
//! is layered and best-effort: structured field first, then content scans.
//! Malformed input never errors; it yields an empty result.

use crate::llm::types::{AssistantToolCall, Message, ToolCallRequest};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Extract normalized tool calls from an assistant message.
///
/// The structured `tool_calls` field wins. When it is absent or empty the
/// content is scanned: think-tags stripped, fenced code blocks tried first,
/// then every balanced JSON object in the remaining text. Calls are deduped
/// by canonical `(name, arguments)` signature, order preserved.
pub fn extract_tool_calls(message: &Message) -> Vec<ToolCallRequest> {
    let mut calls = Vec::new();

    if let Some(structured) = &message.tool_calls {
        for call in structured {
            if let Some(parsed) = from_assistant_call(call) {
                calls.push(parsed);
            }
        }
    }

    if calls.is_empty() {
        calls = extract_from_content(&message.content);
    }

    dedupe_calls(calls)
}

/// Scan free text for tool-call shaped JSON
pub fn extract_from_content(content: &str) -> Vec<ToolCallRequest> {
    let stripped = strip_think_tags(content);
    let mut calls = Vec::new();

    for block in fenced_blocks(&stripped) {
        for value in candidate_objects(&block) {
            calls.extend(tool_calls_from_value(&value));
        }
    }

    if calls.is_empty() {
        for value in candidate_objects(&stripped) {
            calls.extend(tool_calls_from_value(&value));
        }
    }

    calls
}

/// Remove `<think>…</think>` blocks (unterminated tails included)
pub fn strip_think_tags(content: &str) -> String {
    let mut output = String::with_capacity(content.len());
    let mut rest = content;
    loop {
        match rest.find("<think>") {
            Some(start) => {
                output.push_str(&rest[..start]);
                let after = &rest[start + "<think>".len()..];
                match after.find("</think>") {
                    Some(end) => rest = &after[end + "</think>".len()..],
                    None => break,
                }
            }
            None => {
                output.push_str(rest);
                break;
            }
        }
    }
    output
}

/// Contents of triple-backtick code blocks, language tags dropped
pub fn fenced_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let body_start = after.find('\n').map(|idx| idx + 1).unwrap_or(0);
        let body = &after[body_start..];
        match body.find("```") {
            Some(end) => {
                blocks.push(body[..end].trim().to_string());
                rest = &body[end + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Lenient parse used by the planner and reranker: whole text first, then the
/// outermost `{…}` snippet
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// All balanced top-level JSON objects in a text, parsed
fn candidate_objects(text: &str) -> Vec<Value> {
    let mut objects = Vec::new();
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'{' {
            idx += 1;
            continue;
        }
        match balanced_end(bytes, idx) {
            Some(end) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text[idx..=end]) {
                    objects.push(value);
                    idx = end + 1;
                    continue;
                }
                idx += 1;
            }
            None => break,
        }
    }
    objects
}

/// Index of the brace closing the object that opens at `start`
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Interpret one JSON value as zero or more tool calls.
///
/// Accepted shapes: `{name, arguments}`, `{tool, arguments}`,
/// `{function: {name, arguments}}`, and `{tool_calls: […]}` wrapping any of
/// the former.
fn tool_calls_from_value(value: &Value) -> Vec<ToolCallRequest> {
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    if let Some(Value::Array(wrapped)) = object.get("tool_calls") {
        return wrapped.iter().flat_map(tool_calls_from_value).collect();
    }

    if let Some(function) = object.get("function") {
        return tool_calls_from_value(function);
    }

    let name = object
        .get("name")
        .or_else(|| object.get("tool"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if name.is_empty() {
        return Vec::new();
    }

    let arguments = match object.get("arguments") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())),
        _ => Value::Object(Map::new()),
    };

    vec![ToolCallRequest {
        name: name.to_string(),
        arguments,
    }]
}

fn from_assistant_call(call: &AssistantToolCall) -> Option<ToolCallRequest> {
    let name = call.function.name.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = match &call.function.arguments {
        Value::Object(map) => Value::Object(map.clone()),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())),
        _ => Value::Object(Map::new()),
    };
    Some(ToolCallRequest {
        name: name.to_string(),
        arguments,
    })
}

/// Canonical JSON with recursively sorted object keys; object field order can
/// never split two equal calls apart
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

/// Dedup signature for a tool call
pub fn call_signature(call: &ToolCallRequest) -> String {
    format!("{}|{}", call.name, canonical_json(&call.arguments))
}

fn dedupe_calls(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| seen.insert(call_signature(call)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::FunctionCall;
    use serde_json::json;

    fn assistant_with(content: &str) -> Message {
        Message::assistant(content)
    }

    #[test]
    fn structured_field_wins_over_content() {
        let mut message = assistant_with(r#"{"name": "ignored", "arguments": {}}"#);
        message.tool_calls = Some(vec![AssistantToolCall {
            function: FunctionCall {
                name: "read_file".into(),
                arguments: json!({"relative_path": "index.html"}),
            },
        }]);
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn string_arguments_are_decoded() {
        let mut message = assistant_with("");
        message.tool_calls = Some(vec![AssistantToolCall {
            function: FunctionCall {
                name: "create_file".into(),
                arguments: json!(r#"{"relative_path": "a.txt", "content": "hi"}"#),
            },
        }]);
        let calls = extract_tool_calls(&message);
        assert_eq!(calls[0].arguments["relative_path"], "a.txt");
    }

    #[test]
    fn bare_json_in_content() {
        let message =
            assistant_with(r#"Sure. {"name": "list_directory", "arguments": {"relative_path": "."}}"#);
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_directory");
    }

    #[test]
    fn fenced_block_wins_over_surrounding_text() {
        let message = assistant_with(
            "Plan:\n```json\n{\"name\": \"create_file\", \"arguments\": {\"relative_path\": \"x\"}}\n```\ndone",
        );
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "create_file");
    }

    #[test]
    fn think_tags_are_stripped() {
        let message = assistant_with(
            "<think>{\"name\": \"ghost\", \"arguments\": {}}</think>{\"name\": \"real\", \"arguments\": {}}",
        );
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "real");
    }

    #[test]
    fn envelope_shapes_are_accepted() {
        let wrapped = assistant_with(
            r#"{"tool_calls": [{"function": {"name": "a", "arguments": {}}}, {"name": "b", "arguments": {}}]}"#,
        );
        let calls = extract_tool_calls(&wrapped);
        let names: Vec<&str> = calls.iter().map(|call| call.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_calls_collapse_regardless_of_key_order() {
        let message = assistant_with(
            r#"{"name": "t", "arguments": {"a": 1, "b": 2}} and again {"arguments": {"b": 2, "a": 1}, "name": "t"}"#,
        );
        let calls = extract_tool_calls(&message);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn malformed_content_yields_nothing() {
        assert!(extract_tool_calls(&assistant_with("{broken json")).is_empty());
        assert!(extract_tool_calls(&assistant_with("plain prose")).is_empty());
        assert!(extract_tool_calls(&assistant_with("")).is_empty());
    }

    #[test]
    fn lenient_parse_finds_braced_snippet() {
        let value = parse_json_lenient("noise {\"subgoal\": \"x\"} trailing").unwrap();
        assert_eq!(value["subgoal"], "x");
        assert!(parse_json_lenient("no json here").is_none());
        assert!(parse_json_lenient("[1, 2]").is_none());
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let a = json!({"b": {"d": 1, "c": 2}, "a": [3, {"z": 1, "y": 2}]});
        let b = json!({"a": [3, {"y": 2, "z": 1}], "b": {"c": 2, "d": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
