//! Workspace sandbox
//!
//! Every tool path flows through here. Relative paths are validated
//! syntactically, joined against the canonicalized workspace root, and
//! re-checked after symlink resolution so no call can read or write outside
//! the workspace. Subprocesses run with a filtered environment and a hard
//! timeout.

use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Hard cap on text content written through any tool
pub const MAX_FILE_BYTES: usize = 1_000_000;
/// Hard cap on subprocess timeouts
pub const MAX_TOOL_TIMEOUT_SECONDS: u64 = 120;
/// Hard cap on a single path or CLI argument
pub const MAX_TOOL_ARGUMENT_LENGTH: usize = 1024;

/// Validate and canonicalize a workspace root supplied by flag or environment
pub fn resolve_workspace_root(workspace_root: &str) -> Result<PathBuf> {
    if workspace_root.trim().is_empty() {
        return Err(Error::InvalidArgument("WORKSPACE_ROOT is required".into()));
    }
    let expanded = expand_home(workspace_root.trim());
    let root = expanded
        .canonicalize()
        .map_err(|_| Error::InvalidArgument("WORKSPACE_ROOT must exist and be a directory".into()))?;
    if !root.is_absolute() {
        return Err(Error::InvalidArgument("WORKSPACE_ROOT must be an absolute path".into()));
    }
    if !root.is_dir() {
        return Err(Error::InvalidArgument("WORKSPACE_ROOT must exist and be a directory".into()));
    }
    Ok(root)
}

/// Resolve a relative path inside the workspace, rejecting escapes.
///
/// The workspace root must already be canonicalized. Resolution normalizes
/// `.`/`..` lexically, then canonicalizes the deepest existing ancestor so a
/// symlink inside the workspace cannot point the write elsewhere.
pub fn resolve_path_in_workspace(workspace_root: &Path, relative_path: &str) -> Result<PathBuf> {
    validate_relative_path(relative_path)?;
    let joined = workspace_root.join(relative_path);
    let normalized = normalize_lexically(&joined);
    let resolved = resolve_existing_prefix(&normalized)?;
    if !resolved.starts_with(workspace_root) {
        return Err(Error::SandboxEscape("Path escapes workspace sandbox".into()));
    }
    Ok(resolved)
}

/// Syntactic checks shared by every path-taking tool
pub fn validate_relative_path(relative_path: &str) -> Result<()> {
    if relative_path.trim().is_empty() {
        return Err(Error::InvalidArgument("Path must be a non-empty string".into()));
    }
    if relative_path.len() > MAX_TOOL_ARGUMENT_LENGTH {
        return Err(Error::InvalidArgument("Path argument too long".into()));
    }
    if relative_path.contains('\0') {
        return Err(Error::InvalidArgument("Path contains null byte".into()));
    }
    if Path::new(relative_path).is_absolute() {
        return Err(Error::InvalidArgument("Absolute paths are not allowed".into()));
    }
    Ok(())
}

/// Reject content above the write cap
pub fn ensure_text_size_within_limit(text: &str) -> Result<()> {
    if text.len() > MAX_FILE_BYTES {
        return Err(Error::InvalidArgument(format!(
            "File content exceeds max allowed size ({MAX_FILE_BYTES} bytes)"
        )));
    }
    Ok(())
}

/// Clamp-check a subprocess timeout
pub fn validate_timeout(timeout_seconds: i64) -> Result<u64> {
    if timeout_seconds < 1 || timeout_seconds as u64 > MAX_TOOL_TIMEOUT_SECONDS {
        return Err(Error::InvalidArgument(format!(
            "Timeout must be between 1 and {MAX_TOOL_TIMEOUT_SECONDS} seconds"
        )));
    }
    Ok(timeout_seconds as u64)
}

/// Validate subprocess argv entries
pub fn sanitize_cli_arguments(args: &[String]) -> Result<Vec<String>> {
    let mut sanitized = Vec::with_capacity(args.len());
    for value in args {
        if value.len() > MAX_TOOL_ARGUMENT_LENGTH {
            return Err(Error::InvalidArgument("CLI argument too long".into()));
        }
        if value.contains('\0') {
            return Err(Error::InvalidArgument("CLI argument contains null byte".into()));
        }
        sanitized.push(value.clone());
    }
    Ok(sanitized)
}

/// Run a subprocess with a filtered environment and a hard timeout.
///
/// Non-zero exit is not an error: the envelope reports `ok:false` with the
/// captured output. Only spawn failures and timeouts become `Err`.
pub async fn run_safe_command(argv: &[String], cwd: &Path, timeout_seconds: i64) -> Result<Value> {
    let safe_timeout = validate_timeout(timeout_seconds)?;
    let safe_argv = sanitize_cli_arguments(argv)?;
    if safe_argv.is_empty() {
        return Err(Error::InvalidArgument("Command argv must not be empty".into()));
    }

    let mut command = Command::new(&safe_argv[0]);
    command
        .args(&safe_argv[1..])
        .current_dir(cwd)
        .env_clear()
        .kill_on_drop(true);
    for key in ["PATH", "HOME"] {
        if let Ok(value) = std::env::var(key) {
            command.env(key, value);
        }
    }
    for key in ["LANG", "LC_ALL"] {
        command.env(key, std::env::var(key).unwrap_or_else(|_| "C.UTF-8".to_string()));
    }

    let output = tokio::time::timeout(Duration::from_secs(safe_timeout), command.output())
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "Command '{}' timed out after {} seconds",
                safe_argv[0], safe_timeout
            ))
        })??;

    let exit_code = output.status.code().unwrap_or(-1);
    Ok(json!({
        "ok": exit_code == 0,
        "exit_code": exit_code,
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "command": safe_argv,
        "timeout_seconds": safe_timeout,
    }))
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            let trimmed = rest.trim_start_matches('/');
            return if trimmed.is_empty() { home } else { home.join(trimmed) };
        }
    }
    PathBuf::from(path)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = parts.last().copied();
                if !matches!(last, Some(Component::RootDir) | Some(Component::Prefix(_)) | None) {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Canonicalize the deepest existing ancestor and re-append the missing tail
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if existing.exists() {
            let canonical = existing
                .canonicalize()
                .map_err(|_| Error::SandboxEscape("Path escapes workspace sandbox".into()))?;
            let mut resolved = canonical;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Ok(path.to_path_buf()),
        }
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

    #[test]
    fn resolves_plain_relative_path() {
        let (_dir, root) = workspace();
        let resolved = resolve_path_in_workspace(&root, "app/index.html").unwrap();
        assert!(resolved.starts_with(&root));
        assert!(resolved.ends_with("app/index.html"));
    }

    #[test]
    fn rejects_parent_traversal() {
        let (_dir, root) = workspace();
        let err = resolve_path_in_workspace(&root, "../escape.txt").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape(_)));
        assert_eq!(err.to_string(), "Path escapes workspace sandbox");
    }

    #[test]
    fn rejects_nested_traversal() {
        let (_dir, root) = workspace();
        let err = resolve_path_in_workspace(&root, "a/b/../../../escape.txt").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape(_)));
    }

    #[test]
    fn rejects_absolute_path() {
        let (_dir, root) = workspace();
        let err = resolve_path_in_workspace(&root, "/etc/passwd").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn rejects_empty_and_null_paths() {
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("  ").is_err());
        assert!(validate_relative_path("a\0b").is_err());
        assert!(validate_relative_path(&"x".repeat(1025)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (_dir, root) = workspace();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        let err = resolve_path_in_workspace(&root, "link/escape.txt").unwrap_err();
        assert!(matches!(err, Error::SandboxEscape(_)));
    }

    #[test]
    fn text_size_limit() {
        assert!(ensure_text_size_within_limit("small").is_ok());
        assert!(ensure_text_size_within_limit(&"x".repeat(MAX_FILE_BYTES + 1)).is_err());
    }

    #[test]
    fn timeout_bounds() {
        assert!(validate_timeout(0).is_err());
        assert_eq!(validate_timeout(1).unwrap(), 1);
        assert_eq!(validate_timeout(120).unwrap(), 120);
        assert!(validate_timeout(121).is_err());
    }

    #[tokio::test]
    async fn run_safe_command_captures_output() {
        let (_dir, root) = workspace();
        let result = run_safe_command(
            &["echo".to_string(), "hello".to_string()],
            &root,
            10,
        )
        .await
        .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(result["exit_code"], 0);
        assert!(result["stdout"].as_str().unwrap().contains("hello"));
        assert_eq!(result["timeout_seconds"], 10);
    }

    #[tokio::test]
    async fn run_safe_command_reports_nonzero_exit() {
        let (_dir, root) = workspace();
        let result = run_safe_command(&["false".to_string()], &root, 10).await.unwrap();
        assert_eq!(result["ok"], false);
        assert_ne!(result["exit_code"], 0);
    }
}
