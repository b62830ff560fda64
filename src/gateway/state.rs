//! Gateway state
//!
//! All mutable server state lives behind one lock: the workspaces root, the
//! currently open project, its structure summary, the ephemeral chat
//! history, and the single active-run slot. Every endpoint goes through
//! here, which is what enforces the one-run-at-a-time rule.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};

/// Required prefix for every project directory name
pub const PROJECT_PREFIX: &str = "lch_";
/// Entries listed in a structure summary before truncation
const MAX_STRUCTURE_ENTRIES: usize = 250;
/// Chat-history entries included in a task envelope
const TASK_HISTORY_ENTRIES: usize = 8;
/// Character cap per history entry in a task envelope
const TASK_HISTORY_CHARS: usize = 500;

/// One chat-history entry
#[derive(Debug, Clone)]
pub struct ChatEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct StateInner {
    workspaces_root: PathBuf,
    current_project: Option<PathBuf>,
    structure_summary: String,
    chat_history: Vec<ChatEntry>,
    run_in_flight: bool,
    stop_requested: bool,
}

/// Shared, locked gateway state
pub struct GatewayState {
    pub config: GatewayConfig,
    inner: Mutex<StateInner>,
    /// The running orchestrator child, if any; `/api/stop` kills through here
    pub active_child: Arc<Mutex<Option<Child>>>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let inner = StateInner {
            workspaces_root: config.workspaces_root.clone(),
            ..Default::default()
        };
        GatewayState {
            config,
            inner: Mutex::new(inner),
            active_child: Arc::new(Mutex::new(None)),
        }
    }

    /// Payload for `GET /api/status`
    pub async fn status_payload(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        let main_html = inner
            .current_project
            .as_deref()
            .and_then(resolve_main_html);
        serde_json::json!({
            "ok": true,
            "workspaces_root": inner.workspaces_root.to_string_lossy(),
            "current_project": inner.current_project.as_ref().map(|p| p.to_string_lossy().to_string()),
            "main_html": main_html.map(|p| p.to_string_lossy().to_string()),
        })
    }

    /// Replace the workspaces root (created if missing)
    pub async fn set_workspaces_root(&self, requested: &str) -> Result<PathBuf> {
        let trimmed = requested.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("Path is required".into()));
        }
        let target = PathBuf::from(trimmed);
        if !target.is_absolute() {
            return Err(Error::InvalidArgument("Path must be absolute".into()));
        }
        std::fs::create_dir_all(&target)?;
        let validated = validate_absolute_dir(&target.to_string_lossy())?;
        self.inner.lock().await.workspaces_root = validated.clone();
        Ok(validated)
    }

    /// Create a fresh `lch_` project under a parent directory and open it
    pub async fn create_project(&self, parent_dir: &str, workspace_name: &str) -> Result<PathBuf> {
        let name = ensure_workspace_name(workspace_name)?;
        let parent = validate_absolute_dir(parent_dir)?;
        let project = parent.join(name);
        if project.exists() {
            return Err(Error::InvalidArgument("Project folder already exists".into()));
        }
        std::fs::create_dir(&project)?;
        self.open_validated_project(project.clone()).await;
        Ok(project)
    }

    /// Open an existing `lch_` project
    pub async fn open_project(&self, project_path: &str) -> Result<PathBuf> {
        let requested = validate_absolute_dir(project_path)?;
        let name = requested
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if !name.starts_with(PROJECT_PREFIX) {
            return Err(Error::InvalidArgument(format!(
                "Only folders starting with '{PROJECT_PREFIX}' can be opened"
            )));
        }
        self.open_validated_project(requested.clone()).await;
        Ok(requested)
    }

    async fn open_validated_project(&self, project: PathBuf) {
        let summary = summarize_structure(&project);
        let mut inner = self.inner.lock().await;
        inner.current_project = Some(project);
        inner.structure_summary = summary;
        inner.chat_history.clear();
    }

    /// The currently open project, if any
    pub async fn current_project(&self) -> Option<PathBuf> {
        self.inner.lock().await.current_project.clone()
    }

    /// Clear the ephemeral chat history
    pub async fn clear_chat(&self) {
        self.inner.lock().await.chat_history.clear();
    }

    /// Append a chat-history entry
    pub async fn push_history(&self, role: &str, content: &str) {
        self.inner.lock().await.chat_history.push(ChatEntry {
            role: role.to_string(),
            content: content.to_string(),
        });
    }

    /// Claim the single run slot; fails with a busy error when taken.
    /// Returns the project the run operates on and the composed task.
    pub async fn begin_run(&self, user_message: &str) -> Result<(PathBuf, String)> {
        let mut inner = self.inner.lock().await;
        if inner.run_in_flight {
            return Err(Error::InvalidArgument(
                "A run is already in progress; stop it first".into(),
            ));
        }
        let Some(project) = inner.current_project.clone() else {
            return Err(Error::InvalidArgument(
                "Open or create a project before chatting".into(),
            ));
        };

        inner.chat_history.push(ChatEntry {
            role: "user".to_string(),
            content: user_message.to_string(),
        });
        let task = build_task_with_context(
            &project,
            &inner.structure_summary,
            &inner.chat_history,
            user_message,
        );
        inner.run_in_flight = true;
        inner.stop_requested = false;
        Ok((project, task))
    }

    /// Release the run slot; returns whether a stop had been requested
    pub async fn end_run(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.run_in_flight = false;
        std::mem::take(&mut inner.stop_requested)
    }

    /// Flag a stop and kill the child if one is running. Returns true when a
    /// run was active.
    pub async fn request_stop(&self) -> bool {
        let was_active = {
            let mut inner = self.inner.lock().await;
            let active = inner.run_in_flight;
            if active {
                inner.stop_requested = true;
            }
            active
        };
        if was_active {
            if let Some(child) = self.active_child.lock().await.as_mut() {
                let _ = child.start_kill();
            }
        }
        was_active
    }

    /// Whether the current run was asked to stop
    pub async fn stop_requested(&self) -> bool {
        self.inner.lock().await.stop_requested
    }
}

/// Validate a project name: non-empty, no separators, `lch_` prefix
pub fn ensure_workspace_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("Workspace name is required".into()));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(Error::InvalidArgument(
            "Workspace name must not include path separators".into(),
        ));
    }
    if !trimmed.starts_with(PROJECT_PREFIX) {
        return Err(Error::InvalidArgument(format!(
            "Workspace name must start with '{PROJECT_PREFIX}'"
        )));
    }
    Ok(trimmed.to_string())
}

/// Require an existing absolute directory
pub fn validate_absolute_dir(path_text: &str) -> Result<PathBuf> {
    let candidate = PathBuf::from(path_text.trim());
    if !candidate.is_absolute() {
        return Err(Error::InvalidArgument("Path must be absolute".into()));
    }
    let candidate = candidate
        .canonicalize()
        .map_err(|_| Error::InvalidArgument("Path must exist and be a directory".into()))?;
    if !candidate.is_dir() {
        return Err(Error::InvalidArgument("Path must exist and be a directory".into()));
    }
    Ok(candidate)
}

/// The landing page: `index.html`, then `main.html`
pub fn resolve_main_html(project_root: &Path) -> Option<PathBuf> {
    ["index.html", "main.html"]
        .iter()
        .map(|name| project_root.join(name))
        .find(|candidate| candidate.is_file())
}

/// Indented listing of the project tree, hidden entries skipped, truncated
/// at a fixed entry budget
pub fn summarize_structure(root: &Path) -> String {
    let mut rows: Vec<String> = Vec::new();
    let mut entries: Vec<walkdir::DirEntry> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .collect();
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        if rows.len() >= MAX_STRUCTURE_ENTRIES {
            rows.push("- ... (truncated)".to_string());
            break;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.split('/').any(|part| part.starts_with('.')) {
            continue;
        }
        if entry.file_type().is_dir() {
            rows.push(format!("- {rel}/"));
        } else {
            rows.push(format!("- {rel}"));
        }
    }

    if rows.is_empty() {
        "- (empty project)".to_string()
    } else {
        rows.join("\n")
    }
}

/// Compose the task envelope handed to the orchestrator child
fn build_task_with_context(
    project: &Path,
    structure: &str,
    history: &[ChatEntry],
    user_message: &str,
) -> String {
    let landing_line = match resolve_main_html(project) {
        Some(main_html) => format!(
            "Landing page file detected: {}.",
            main_html
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        ),
        None => "Landing page convention: use index.html if present, otherwise main.html as fallback."
            .to_string(),
    };

    let start = history.len().saturating_sub(TASK_HISTORY_ENTRIES);
    let history_lines: Vec<String> = history[start..]
        .iter()
        .map(|entry| {
            let content: String = entry.content.chars().take(TASK_HISTORY_CHARS).collect();
            format!("- {}: {}", entry.role, content)
        })
        .collect();
    let history_text = if history_lines.is_empty() {
        "- none".to_string()
    } else {
        history_lines.join("\n")
    };

    format!(
        "Project context follows. Learn and use this workspace structure for all edits.\n\
Workspace absolute path: {}\n\
{landing_line}\n\
Workspace structure:\n{structure}\n\n\
Conversation memory (ephemeral for current app session):\n{history_text}\n\n\
User request:\n{user_message}\n\n\
Return phased progress through tool usage and finish with DONE: when complete.",
        project.to_string_lossy(),
    )
}
