//! Workspace file tools
//!
//! Whole-file writes, capped reads, directory listing, and the structured
//! edit tools (append, marker insert, line-range replace). Every path goes
//! through the sandbox resolver; every content payload through the size cap.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::sandbox::{ensure_text_size_within_limit, resolve_path_in_workspace, validate_relative_path};

use super::traits::Tool;

fn string_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn path_arg(args: &Value, key: &str) -> String {
    string_arg(args, key).trim().to_string()
}

fn bool_arg(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn int_arg(args: &Value, key: &str, default: i64) -> i64 {
    args.get(key).and_then(Value::as_i64).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// create_file
// ---------------------------------------------------------------------------

/// Write a complete UTF-8 text file
pub struct CreateFileTool {
    workspace: PathBuf,
}

impl CreateFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        CreateFileTool { workspace }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a UTF-8 text file at a workspace-relative path with the given full content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Complete file content"
                },
                "overwrite": {
                    "type": "boolean",
                    "description": "Replace an existing file instead of failing"
                }
            },
            "required": ["relative_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let relative_path = path_arg(&args, "relative_path");
        let content = string_arg(&args, "content");
        let overwrite = bool_arg(&args, "overwrite", false);

        validate_relative_path(&relative_path)?;
        ensure_text_size_within_limit(&content)?;
        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;

        let existed = target.exists();
        if existed && target.is_dir() {
            return Err(Error::InvalidArgument("Target path is a directory".into()));
        }
        if existed && !overwrite {
            return Err(Error::InvalidArgument(
                "File already exists; set overwrite=true to replace".into(),
            ));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content.as_bytes()).await?;

        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "bytes_written": content.len(),
            "overwritten": existed && overwrite,
        }))
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

/// Read a file with a byte cap and truncation flag
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        ReadFileTool { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read up to max_bytes of a workspace file, UTF-8 decoded, with a truncation flag."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "max_bytes": {
                    "type": "integer",
                    "description": "Byte cap, 1..=200000 (default 65536)"
                }
            },
            "required": ["relative_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let relative_path = path_arg(&args, "relative_path");
        let max_bytes = int_arg(&args, "max_bytes", 65_536);

        validate_relative_path(&relative_path)?;
        if !(1..=200_000).contains(&max_bytes) {
            return Err(Error::InvalidArgument(
                "max_bytes must be between 1 and 200000".into(),
            ));
        }

        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;
        if !target.is_file() {
            return Err(Error::InvalidArgument("Requested file does not exist".into()));
        }

        let raw = tokio::fs::read(&target).await?;
        let chunk = &raw[..raw.len().min(max_bytes as usize)];
        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "truncated": raw.len() > max_bytes as usize,
            "size_bytes": raw.len(),
            "content": String::from_utf8_lossy(chunk),
        }))
    }
}

// ---------------------------------------------------------------------------
// list_directory
// ---------------------------------------------------------------------------

/// List a workspace directory, sorted by name
pub struct ListDirectoryTool {
    workspace: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(workspace: PathBuf) -> Self {
        ListDirectoryTool { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory with is_dir/is_file flags."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Directory relative to the workspace root (default '.')"
                },
                "include_hidden": {
                    "type": "boolean",
                    "description": "Include dot-prefixed entries"
                }
            },
            "required": [],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let mut relative_path = path_arg(&args, "relative_path");
        if relative_path.is_empty() {
            relative_path = ".".to_string();
        }
        let include_hidden = bool_arg(&args, "include_hidden", false);

        validate_relative_path(&relative_path)?;
        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;
        if !target.is_dir() {
            return Err(Error::InvalidArgument("Requested directory does not exist".into()));
        }

        let mut names: Vec<(String, bool, bool)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&target).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            names.push((name, file_type.is_dir(), file_type.is_file()));
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<Value> = names
            .into_iter()
            .map(|(name, is_dir, is_file)| {
                json!({"name": name, "is_dir": is_dir, "is_file": is_file})
            })
            .collect();

        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "count": entries.len(),
            "entries": entries,
        }))
    }
}

// ---------------------------------------------------------------------------
// append_to_file
// ---------------------------------------------------------------------------

/// Append text to an existing file
pub struct AppendToFileTool {
    workspace: PathBuf,
}

impl AppendToFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        AppendToFileTool { workspace }
    }
}

#[async_trait]
impl Tool for AppendToFileTool {
    fn name(&self) -> &str {
        "append_to_file"
    }

    fn description(&self) -> &str {
        "Append text to an existing workspace file, optionally forcing a newline boundary first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Text to append"
                },
                "ensure_newline": {
                    "type": "boolean",
                    "description": "Insert a newline before the payload when the file does not end with one (default true)"
                }
            },
            "required": ["relative_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let relative_path = path_arg(&args, "relative_path");
        let content = string_arg(&args, "content");
        let ensure_newline = bool_arg(&args, "ensure_newline", true);

        validate_relative_path(&relative_path)?;
        ensure_text_size_within_limit(&content)?;
        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;
        if !target.is_file() {
            return Err(Error::InvalidArgument("Target file does not exist".into()));
        }

        let existing_bytes = tokio::fs::read(&target).await?;
        let existing = String::from_utf8_lossy(&existing_bytes).to_string();
        let payload = if ensure_newline && !existing.is_empty() && !existing.ends_with('\n') {
            format!("\n{content}")
        } else {
            content
        };

        tokio::fs::write(&target, format!("{existing}{payload}").as_bytes()).await?;
        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "bytes_appended": payload.len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// insert_after_marker
// ---------------------------------------------------------------------------

/// Insert text directly after a marker string
pub struct InsertAfterMarkerTool {
    workspace: PathBuf,
}

impl InsertAfterMarkerTool {
    pub fn new(workspace: PathBuf) -> Self {
        InsertAfterMarkerTool { workspace }
    }
}

#[async_trait]
impl Tool for InsertAfterMarkerTool {
    fn name(&self) -> &str {
        "insert_after_marker"
    }

    fn description(&self) -> &str {
        "Insert text immediately after the first or last occurrence of a marker string in a file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "marker": {
                    "type": "string",
                    "description": "Literal marker to search for"
                },
                "content": {
                    "type": "string",
                    "description": "Text inserted after the marker"
                },
                "occurrence": {
                    "type": "string",
                    "description": "'first' or 'last' (default 'first')"
                }
            },
            "required": ["relative_path", "marker", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let relative_path = path_arg(&args, "relative_path");
        let marker = string_arg(&args, "marker");
        let content = string_arg(&args, "content");
        let mut occurrence = path_arg(&args, "occurrence").to_lowercase();
        if occurrence.is_empty() {
            occurrence = "first".to_string();
        }
        if occurrence != "first" && occurrence != "last" {
            return Err(Error::InvalidArgument("occurrence must be 'first' or 'last'".into()));
        }

        validate_relative_path(&relative_path)?;
        ensure_text_size_within_limit(&content)?;
        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;
        if !target.is_file() {
            return Err(Error::InvalidArgument("Target file does not exist".into()));
        }

        let source_bytes = tokio::fs::read(&target).await?;
        let source = String::from_utf8_lossy(&source_bytes).to_string();
        let position = if occurrence == "first" {
            source.find(&marker)
        } else {
            source.rfind(&marker)
        };
        let Some(position) = position else {
            return Err(Error::InvalidArgument("marker not found in file".into()));
        };

        let insert_at = position + marker.len();
        let updated = format!("{}{}{}", &source[..insert_at], content, &source[insert_at..]);
        tokio::fs::write(&target, updated.as_bytes()).await?;

        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "marker": marker,
            "occurrence": occurrence,
            "bytes_inserted": content.len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// replace_range
// ---------------------------------------------------------------------------

/// Replace an inclusive 1-based line range
pub struct ReplaceRangeTool {
    workspace: PathBuf,
}

impl ReplaceRangeTool {
    pub fn new(workspace: PathBuf) -> Self {
        ReplaceRangeTool { workspace }
    }
}

#[async_trait]
impl Tool for ReplaceRangeTool {
    fn name(&self) -> &str {
        "replace_range"
    }

    fn description(&self) -> &str {
        "Replace an inclusive 1-based line range of a file with new text; out-of-range indices clamp to the file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "file_path": {
                    "type": "string",
                    "description": "Alias for relative_path"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to replace (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to replace (inclusive)"
                },
                "content": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replacement_text": {
                    "type": "string",
                    "description": "Alias for content"
                },
                "allow_empty": {
                    "type": "boolean",
                    "description": "Permit an empty replacement (deletes the range)"
                }
            },
            "required": ["start_line", "end_line"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let mut relative_path = path_arg(&args, "relative_path");
        if relative_path.is_empty() {
            relative_path = path_arg(&args, "file_path");
        }
        let start_line = int_arg(&args, "start_line", 0);
        let end_line = int_arg(&args, "end_line", 0);
        let has_content = args.get("content").is_some();
        let has_replacement = args.get("replacement_text").is_some();
        let content = if has_content {
            string_arg(&args, "content")
        } else {
            string_arg(&args, "replacement_text")
        };
        let allow_empty = bool_arg(&args, "allow_empty", false);

        if !has_content && !has_replacement {
            return Err(Error::InvalidArgument(
                "replace_range requires 'content' or 'replacement_text'".into(),
            ));
        }
        if content.is_empty() && !allow_empty {
            return Err(Error::InvalidArgument(
                "replace_range replacement text is empty; set allow_empty=true to explicitly delete range"
                    .into(),
            ));
        }

        validate_relative_path(&relative_path)?;
        ensure_text_size_within_limit(&content)?;
        if start_line < 1 || end_line < start_line {
            return Err(Error::InvalidArgument("start_line/end_line are invalid".into()));
        }

        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;
        if target.is_dir() {
            return Err(Error::InvalidArgument("Target path is a directory".into()));
        }
        if !target.exists() {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, b"").await?;
        }

        let source_bytes = tokio::fs::read(&target).await?;
        let source = String::from_utf8_lossy(&source_bytes).to_string();
        let lines: Vec<&str> = source.split_inclusive('\n').collect();

        let start_idx = ((start_line - 1).max(0) as usize).min(lines.len());
        let end_idx = (end_line.max(0) as usize).max(start_idx).min(lines.len());

        let mut replacement = content;
        if !replacement.is_empty()
            && !replacement.ends_with('\n')
            && lines.iter().any(|line| line.ends_with('\n'))
        {
            replacement.push('\n');
        }

        let mut updated = String::new();
        for line in &lines[..start_idx] {
            updated.push_str(line);
        }
        updated.push_str(&replacement);
        for line in &lines[end_idx..] {
            updated.push_str(line);
        }
        tokio::fs::write(&target, updated.as_bytes()).await?;

        Ok(json!({
            "ok": true,
            "path": target.to_string_lossy(),
            "relative_path": relative_path,
            "start_line": start_line,
            "end_line": end_line,
            "effective_start_line": start_idx + 1,
            "effective_end_line": end_idx,
            "bytes_written": replacement.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    #[tokio::test]
    async fn create_then_read_round_trip() {
        let (_dir, root) = workspace();
        let create = CreateFileTool::new(root.clone());
        let read = ReadFileTool::new(root.clone());

        let written = create
            .execute(json!({"relative_path": "app/index.html", "content": "<html>hi</html>"}))
            .await
            .unwrap();
        assert_eq!(written["ok"], true);
        assert_eq!(written["bytes_written"], 15);

        let result = read
            .execute(json!({"relative_path": "app/index.html"}))
            .await
            .unwrap();
        assert_eq!(result["content"], "<html>hi</html>");
        assert_eq!(result["truncated"], false);
    }

    #[tokio::test]
    async fn create_refuses_overwrite_without_flag() {
        let (_dir, root) = workspace();
        let create = CreateFileTool::new(root.clone());
        create
            .execute(json!({"relative_path": "a.txt", "content": "one"}))
            .await
            .unwrap();

        let error = create
            .execute(json!({"relative_path": "a.txt", "content": "two"}))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("overwrite=true"));

        let replaced = create
            .execute(json!({"relative_path": "a.txt", "content": "two", "overwrite": true}))
            .await
            .unwrap();
        assert_eq!(replaced["overwritten"], true);
        assert_eq!(
            std::fs::read_to_string(root.join("a.txt")).unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn read_truncates_at_max_bytes() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("big.txt"), "abcdefghij").unwrap();
        let read = ReadFileTool::new(root.clone());

        let result = read
            .execute(json!({"relative_path": "big.txt", "max_bytes": 4}))
            .await
            .unwrap();
        assert_eq!(result["truncated"], true);
        assert_eq!(result["content"], "abcd");
        assert_eq!(result["size_bytes"], 10);

        assert!(read
            .execute(json!({"relative_path": "big.txt", "max_bytes": 0}))
            .await
            .is_err());
        assert!(read
            .execute(json!({"relative_path": "big.txt", "max_bytes": 200_001}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn list_directory_sorts_and_hides_dotfiles() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("b.txt"), "").unwrap();
        std::fs::write(root.join("a.txt"), "").unwrap();
        std::fs::write(root.join(".hidden"), "").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let list = ListDirectoryTool::new(root.clone());
        let result = list.execute(json!({})).await.unwrap();
        let names: Vec<&str> = result["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert_eq!(result["count"], 3);

        let with_hidden = list.execute(json!({"include_hidden": true})).await.unwrap();
        assert_eq!(with_hidden["count"], 4);
    }

    #[tokio::test]
    async fn append_inserts_newline_boundary() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("log.txt"), "line one").unwrap();
        let append = AppendToFileTool::new(root.clone());

        append
            .execute(json!({"relative_path": "log.txt", "content": "line two"}))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("log.txt")).unwrap(),
            "line one\nline two"
        );

        let error = append
            .execute(json!({"relative_path": "missing.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn insert_after_marker_first_and_last() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("doc.txt"), "A MARK B MARK C").unwrap();
        let insert = InsertAfterMarkerTool::new(root.clone());

        insert
            .execute(json!({
                "relative_path": "doc.txt",
                "marker": "MARK",
                "content": "!",
                "occurrence": "last",
            }))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("doc.txt")).unwrap(),
            "A MARK B MARK! C"
        );

        let error = insert
            .execute(json!({
                "relative_path": "doc.txt",
                "marker": "ABSENT",
                "content": "!",
            }))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "marker not found in file");
    }

    #[tokio::test]
    async fn replace_range_clamps_out_of_range() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("code.js"), "one\ntwo\nthree\n").unwrap();
        let replace = ReplaceRangeTool::new(root.clone());

        let result = replace
            .execute(json!({
                "relative_path": "code.js",
                "start_line": 5,
                "end_line": 9,
                "content": "tail",
            }))
            .await
            .unwrap();
        assert_eq!(result["effective_start_line"], 4);
        assert_eq!(result["effective_end_line"], 3);
        assert_eq!(
            std::fs::read_to_string(root.join("code.js")).unwrap(),
            "one\ntwo\nthree\ntail\n"
        );
    }

    #[tokio::test]
    async fn replace_range_rejects_inverted_range_and_empty_content() {
        let (_dir, root) = workspace();
        std::fs::write(root.join("code.js"), "one\ntwo\n").unwrap();
        let replace = ReplaceRangeTool::new(root.clone());

        let error = replace
            .execute(json!({
                "relative_path": "code.js",
                "start_line": 3,
                "end_line": 2,
                "content": "x",
            }))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "start_line/end_line are invalid");

        let error = replace
            .execute(json!({
                "relative_path": "code.js",
                "start_line": 1,
                "end_line": 1,
                "content": "",
            }))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("allow_empty=true"));

        replace
            .execute(json!({
                "relative_path": "code.js",
                "start_line": 1,
                "end_line": 1,
                "content": "",
                "allow_empty": true,
            }))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(root.join("code.js")).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn replace_range_accepts_file_path_alias_and_creates_missing_file() {
        let (_dir, root) = workspace();
        let replace = ReplaceRangeTool::new(root.clone());
        replace
            .execute(json!({
                "file_path": "fresh.txt",
                "start_line": 1,
                "end_line": 1,
                "replacement_text": "hello",
            }))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(root.join("fresh.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn every_file_tool_rejects_escapes() {
        let (_dir, root) = workspace();
        let args = json!({"relative_path": "../escape.txt", "content": "x"});
        assert!(CreateFileTool::new(root.clone()).execute(args.clone()).await.is_err());
        assert!(ReadFileTool::new(root.clone())
            .execute(json!({"relative_path": "../escape.txt"}))
            .await
            .is_err());
        assert!(AppendToFileTool::new(root.clone()).execute(args.clone()).await.is_err());
        assert!(InsertAfterMarkerTool::new(root.clone())
            .execute(json!({"relative_path": "../e", "marker": "m", "content": "c"}))
            .await
            .is_err());
        assert!(ReplaceRangeTool::new(root)
            .execute(json!({"relative_path": "../e", "start_line": 1, "end_line": 1, "content": "c"}))
            .await
            .is_err());
    }
}
