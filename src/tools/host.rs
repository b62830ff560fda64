//! Tool host wire protocol
//!
//! One JSON request object in, exactly one JSON response object out:
//!
//! ```text
//! {"action": "list_tools"}
//! {"action": "call_tool", "tool": "<name>", "arguments": {…}}
//! ```
//!
//! Responses are `{ok, action, tool?, result}` on success and
//! `{ok:false, error:{type, message}}` on any failure. The outer `ok` is
//! transport success; the inner `result.ok` is semantic success.

use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::registry::ToolRegistry;

/// Handle one wire request, returning the response envelope.
///
/// Errors never escape: every failure becomes an `{ok:false, error}` object.
pub async fn handle_request(registry: &ToolRegistry, request: &Value) -> Value {
    match dispatch(registry, request).await {
        Ok(response) => response,
        Err(error) => error_envelope(&error),
    }
}

/// Render an error as the wire-format failure envelope
pub fn error_envelope(error: &Error) -> Value {
    json!({
        "ok": false,
        "error": {
            "type": error.wire_type(),
            "message": error.to_string(),
        },
    })
}

async fn dispatch(registry: &ToolRegistry, request: &Value) -> Result<Value> {
    let Some(request) = request.as_object() else {
        return Err(Error::InvalidArgument("Request must be a JSON object".into()));
    };

    match request.get("action").and_then(Value::as_str) {
        Some("list_tools") => Ok(json!({
            "ok": true,
            "action": "list_tools",
            "result": registry.list_tools(),
        })),
        Some("call_tool") => {
            let tool_name = request
                .get("tool")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    Error::InvalidArgument("'tool' must be a non-empty string for call_tool".into())
                })?;
            let arguments = match request.get("arguments") {
                Some(value) if value.is_object() => value.clone(),
                Some(_) => {
                    return Err(Error::InvalidArgument("'arguments' must be an object".into()))
                }
                None => json!({}),
            };

            let result = registry.call_tool(tool_name, &arguments).await?;
            Ok(json!({
                "ok": true,
                "action": "call_tool",
                "tool": tool_name,
                "result": result,
            }))
        }
        _ => Err(Error::InvalidArgument(
            "Unsupported action. Use 'list_tools' or 'call_tool'.".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::build_registry;
    use tempfile::TempDir;

    async fn host_request(request: Value) -> Value {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(&dir.path().canonicalize().unwrap()).unwrap();
        handle_request(&registry, &request).await
    }

    #[tokio::test]
    async fn list_tools_reports_the_catalog() {
        let response = host_request(json!({"action": "list_tools"})).await;
        assert_eq!(response["ok"], true);
        assert_eq!(response["action"], "list_tools");
        let names: Vec<&str> = response["result"]
            .as_array()
            .unwrap()
            .iter()
            .map(|spec| spec["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"create_file"));
        assert!(names.contains(&"validate_web_app"));
        assert!(names.contains(&"sandbox_echo_path"));
    }

    #[tokio::test]
    async fn sandbox_breach_has_the_contract_shape() {
        let response = host_request(json!({
            "action": "call_tool",
            "tool": "create_file",
            "arguments": {"relative_path": "../escape.txt", "content": "x"},
        }))
        .await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["type"], "ValueError");
        assert_eq!(response["error"]["message"], "Path escapes workspace sandbox");
    }

    #[tokio::test]
    async fn unexpected_argument_is_named() {
        let response = host_request(json!({
            "action": "call_tool",
            "tool": "scaffold_web_app",
            "arguments": {"app_dir": "demo", "unexpected": "x"},
        }))
        .await;
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"]["type"], "ValueError");
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("arguments.unexpected"));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_rejected_before_dispatch() {
        let response = host_request(json!({
            "action": "call_tool",
            "tool": "run_unit_tests",
            "arguments": {"test_file": "demo/tests.js", "timeout_seconds": "10"},
        }))
        .await;
        assert_eq!(response["ok"], false);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("timeout_seconds must be an integer"));
    }

    #[tokio::test]
    async fn unknown_actions_and_tools_fail_cleanly() {
        let response = host_request(json!({"action": "destroy"})).await;
        assert_eq!(response["ok"], false);

        let response = host_request(json!({"action": "call_tool", "tool": "nope"})).await;
        assert_eq!(response["ok"], false);
        assert!(response["error"]["message"].as_str().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn call_tool_wraps_the_inner_result() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(&dir.path().canonicalize().unwrap()).unwrap();
        let response = handle_request(
            &registry,
            &json!({
                "action": "call_tool",
                "tool": "create_file",
                "arguments": {"relative_path": "hello.txt", "content": "hi"},
            }),
        )
        .await;
        assert_eq!(response["ok"], true);
        assert_eq!(response["action"], "call_tool");
        assert_eq!(response["tool"], "create_file");
        assert_eq!(response["result"]["ok"], true);
        assert_eq!(response["result"]["bytes_written"], 2);
    }
}
