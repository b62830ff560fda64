//! Sandbox metadata probe

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::Result;
use crate::sandbox::resolve_path_in_workspace;

use super::traits::Tool;

/// Resolve a path inside the sandbox and report what is there.
///
/// Exists so tests and the model can probe containment behavior without
/// touching file contents.
pub struct SandboxEchoPathTool {
    workspace: PathBuf,
}

impl SandboxEchoPathTool {
    pub fn new(workspace: PathBuf) -> Self {
        SandboxEchoPathTool { workspace }
    }
}

#[async_trait]
impl Tool for SandboxEchoPathTool {
    fn name(&self) -> &str {
        "sandbox_echo_path"
    }

    fn description(&self) -> &str {
        "Return metadata for a workspace-relative path while enforcing sandbox boundaries."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "relative_path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                }
            },
            "required": [],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let relative_path = args
            .get("relative_path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let target = resolve_path_in_workspace(&self.workspace, &relative_path)?;

        let mut payload = json!({
            "ok": true,
            "workspace_root": self.workspace.to_string_lossy(),
            "requested_relative_path": relative_path,
            "resolved_path": target.to_string_lossy(),
            "exists": target.exists(),
            "is_dir": target.is_dir(),
        });

        if target.is_dir() {
            let mut children: Vec<String> = Vec::new();
            let mut entries = tokio::fs::read_dir(&target).await?;
            while let Some(entry) = entries.next_entry().await? {
                children.push(entry.file_name().to_string_lossy().to_string());
            }
            children.sort();
            children.truncate(50);
            payload["children"] = json!(children);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn echoes_directory_metadata() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("a.txt"), "").unwrap();
        std::fs::write(root.join("b.txt"), "").unwrap();

        let tool = SandboxEchoPathTool::new(root);
        let result = tool.execute(json!({})).await.unwrap();
        assert_eq!(result["exists"], true);
        assert_eq!(result["is_dir"], true);
        assert_eq!(result["children"], json!(["a.txt", "b.txt"]));
    }

    #[tokio::test]
    async fn rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let tool = SandboxEchoPathTool::new(root);
        assert!(tool
            .execute(json!({"relative_path": "../outside"}))
            .await
            .is_err());
    }
}
