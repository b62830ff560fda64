//! Tool-call normalization
//!
//! Local models invent tool names and argument spellings. Before dispatch,
//! calls are rewritten into the catalog's vocabulary: name aliases and fuzzy
//! substring matches, `file_path` → `relative_path`, default `overwrite` for
//! writes, and path cleanup (leading `./`, absolute paths pointing inside
//! the workspace). Calls that still target an unknown tool pass through and
//! fail at dispatch with a reportable error.

use serde_json::{Map, Value};
use std::path::Path;

use crate::llm::extract::call_signature;
use crate::llm::ToolCallRequest;

/// Hard-coded aliases seen in model output
const NAME_ALIASES: [(&str, &str); 6] = [
    ("edit_file", "create_file"),
    ("write_file", "create_file"),
    ("save_file", "create_file"),
    ("open_file", "read_file"),
    ("view_file", "read_file"),
    ("list_files", "list_directory"),
];

/// Argument keys that carry workspace-relative paths
const PATH_KEYS: [&str; 4] = ["relative_path", "app_dir", "test_file", "file_path"];

/// Tools whose success means a file write
pub const WRITE_TOOLS: [&str; 5] = [
    "create_file",
    "append_to_file",
    "insert_after_marker",
    "replace_range",
    "scaffold_web_app",
];

/// Structured edit tools subject to the read-before-write discipline
pub const EDIT_TOOLS: [&str; 4] = [
    "create_file",
    "append_to_file",
    "insert_after_marker",
    "replace_range",
];

/// Normalize a batch of calls and collapse duplicates (canonical sorted-key
/// signatures), preserving first-seen order
pub fn normalize_tool_calls(
    calls: Vec<ToolCallRequest>,
    known_tools: &[String],
    workspace_root: &Path,
) -> Vec<ToolCallRequest> {
    let mut seen = std::collections::HashSet::new();
    calls
        .into_iter()
        .map(|call| normalize_tool_call(call, known_tools, workspace_root))
        .filter(|call| seen.insert(call_signature(call)))
        .collect()
}

/// Normalize one call: resolve the name, then rewrite the arguments
pub fn normalize_tool_call(
    call: ToolCallRequest,
    known_tools: &[String],
    workspace_root: &Path,
) -> ToolCallRequest {
    let name = resolve_tool_name(&call.name, known_tools);
    let arguments = normalize_arguments(&name, call.arguments, workspace_root);
    ToolCallRequest { name, arguments }
}

/// Map a model-supplied name onto the catalog: exact, alias, then substring
pub fn resolve_tool_name(name: &str, known_tools: &[String]) -> String {
    let trimmed = name.trim();
    if known_tools.iter().any(|known| known == trimmed) {
        return trimmed.to_string();
    }

    for (alias, canonical) in NAME_ALIASES {
        if trimmed == alias {
            return canonical.to_string();
        }
    }

    let lower = trimmed.to_lowercase();
    if !lower.is_empty() {
        if let Some(matched) = known_tools
            .iter()
            .find(|known| known.contains(&lower) || lower.contains(known.as_str()))
        {
            return matched.clone();
        }
    }

    trimmed.to_string()
}

fn normalize_arguments(name: &str, arguments: Value, workspace_root: &Path) -> Value {
    let mut object = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    // file_path is an accepted alias only for replace_range; everywhere else
    // it is rewritten to relative_path
    if name != "replace_range" {
        if let Some(value) = object.remove("file_path") {
            object.entry("relative_path").or_insert(value);
        }
    }

    for key in PATH_KEYS {
        if let Some(Value::String(path)) = object.get(key) {
            let cleaned = normalize_path_argument(path, workspace_root);
            object.insert(key.to_string(), Value::String(cleaned));
        }
    }

    if name == "create_file" && !object.contains_key("overwrite") {
        object.insert("overwrite".to_string(), Value::Bool(true));
    }

    Value::Object(object)
}

/// Clean one path argument: trim, drop `./` prefixes, re-relativize absolute
/// paths that point inside the workspace. Absolute paths outside it are left
/// for the sandbox to reject.
pub fn normalize_path_argument(path: &str, workspace_root: &Path) -> String {
    let mut cleaned = path.trim().to_string();

    if cleaned.starts_with('/') {
        let root = workspace_root.to_string_lossy().to_string();
        let prefix = format!("{}/", root.trim_end_matches('/'));
        if let Some(stripped) = cleaned.strip_prefix(&prefix) {
            cleaned = stripped.to_string();
        } else if cleaned == root.trim_end_matches('/') {
            cleaned = ".".to_string();
        } else {
            return cleaned;
        }
    }

    while let Some(stripped) = cleaned.strip_prefix("./") {
        cleaned = stripped.to_string();
    }
    cleaned.trim().to_string()
}

/// Whether a successful call of this tool counts as a file write
pub fn is_write_tool(name: &str) -> bool {
    WRITE_TOOLS.contains(&name)
}

/// Whether this tool participates in the read-before-write discipline
pub fn is_edit_tool(name: &str) -> bool {
    EDIT_TOOLS.contains(&name)
}

/// The path a write-class call targets, if any
pub fn write_target(call: &ToolCallRequest) -> Option<String> {
    let key = if call.name == "scaffold_web_app" { "app_dir" } else { "relative_path" };
    call.arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn known() -> Vec<String> {
        [
            "create_file",
            "read_file",
            "list_directory",
            "replace_range",
            "validate_web_app",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn root() -> PathBuf {
        PathBuf::from("/work/space")
    }

    #[test]
    fn aliases_resolve_to_canonical_names() {
        let known = known();
        assert_eq!(resolve_tool_name("write_file", &known), "create_file");
        assert_eq!(resolve_tool_name("edit_file", &known), "create_file");
        assert_eq!(resolve_tool_name("open_file", &known), "read_file");
        assert_eq!(resolve_tool_name("list_files", &known), "list_directory");
    }

    #[test]
    fn fuzzy_substring_match_as_fallback() {
        let known = known();
        assert_eq!(resolve_tool_name("validate", &known), "validate_web_app");
        assert_eq!(resolve_tool_name("read_file_tool", &known), "read_file");
        assert_eq!(resolve_tool_name("launch_rockets", &known), "launch_rockets");
    }

    #[test]
    fn file_path_is_rewritten_except_for_replace_range() {
        let call = normalize_tool_call(
            ToolCallRequest {
                name: "create_file".into(),
                arguments: json!({"file_path": "a.txt", "content": "x"}),
            },
            &known(),
            &root(),
        );
        assert_eq!(call.arguments["relative_path"], "a.txt");
        assert!(call.arguments.get("file_path").is_none());

        let call = normalize_tool_call(
            ToolCallRequest {
                name: "replace_range".into(),
                arguments: json!({"file_path": "a.txt", "start_line": 1, "end_line": 1, "content": "x"}),
            },
            &known(),
            &root(),
        );
        assert_eq!(call.arguments["file_path"], "a.txt");
    }

    #[test]
    fn create_file_defaults_overwrite_true() {
        let call = normalize_tool_call(
            ToolCallRequest {
                name: "create_file".into(),
                arguments: json!({"relative_path": "a.txt", "content": "x"}),
            },
            &known(),
            &root(),
        );
        assert_eq!(call.arguments["overwrite"], true);

        let call = normalize_tool_call(
            ToolCallRequest {
                name: "create_file".into(),
                arguments: json!({"relative_path": "a.txt", "content": "x", "overwrite": false}),
            },
            &known(),
            &root(),
        );
        assert_eq!(call.arguments["overwrite"], false);
    }

    #[test]
    fn path_arguments_are_cleaned() {
        assert_eq!(normalize_path_argument(" ./app/a.txt ", &root()), "app/a.txt");
        assert_eq!(normalize_path_argument("././b.txt", &root()), "b.txt");
        assert_eq!(
            normalize_path_argument("/work/space/app/index.html", &root()),
            "app/index.html"
        );
        assert_eq!(normalize_path_argument("/work/space", &root()), ".");
        // outside the workspace: left for the sandbox to reject
        assert_eq!(normalize_path_argument("/etc/passwd", &root()), "/etc/passwd");
    }

    #[test]
    fn duplicate_calls_collapse_after_normalization() {
        let calls = vec![
            ToolCallRequest {
                name: "write_file".into(),
                arguments: json!({"file_path": "./a.txt", "content": "x"}),
            },
            ToolCallRequest {
                name: "create_file".into(),
                arguments: json!({"relative_path": "a.txt", "content": "x", "overwrite": true}),
            },
        ];
        let normalized = normalize_tool_calls(calls, &known(), &root());
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].name, "create_file");
    }

    #[test]
    fn write_target_reads_the_right_key() {
        let call = ToolCallRequest {
            name: "scaffold_web_app".into(),
            arguments: json!({"app_dir": "demo"}),
        };
        assert_eq!(write_target(&call).as_deref(), Some("demo"));

        let call = ToolCallRequest {
            name: "create_file".into(),
            arguments: json!({"relative_path": ""}),
        };
        assert_eq!(write_target(&call), None);
    }
}
