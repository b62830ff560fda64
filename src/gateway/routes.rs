//! HTTP surface
//!
//! Every endpoint of the UI gateway: project lifecycle, the NDJSON chat
//! stream (which spawns the orchestrator child and relays its stderr events
//! line by line), cancellation, static assets, and the workspace file proxy.

use axum::body::{Body, Bytes};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::error::Error;

use super::events::{events_from_stderr_line, RunState, UiEvent};
use super::state::{resolve_main_html, GatewayState};

/// Build the gateway router
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/style.css", get(serve_style))
        .route("/script.js", get(serve_script))
        .route("/api/status", get(api_status))
        .route("/api/set-workspaces-root", post(api_set_workspaces_root))
        .route("/api/choose-folder", post(api_choose_folder))
        .route("/api/create-project", post(api_create_project))
        .route("/api/open-project", post(api_open_project))
        .route("/api/open-main-html", post(api_open_main_html))
        .route("/api/clear-chat", post(api_clear_chat))
        .route("/api/stop", post(api_stop))
        .route("/api/chat", post(api_chat))
        .route("/workspace/{*path}", get(workspace_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PathBody {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProjectBody {
    #[serde(default)]
    parent_dir: String,
    #[serde(default = "default_workspace_name")]
    workspace_name: String,
}

fn default_workspace_name() -> String {
    "lch_new_project".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenProjectBody {
    #[serde(default)]
    project_path: String,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    #[serde(default)]
    message: String,
}

// ---------------------------------------------------------------------------
// Plain JSON endpoints
// ---------------------------------------------------------------------------

fn error_response(error: &Error) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "ok": false,
            "error": {"type": error.wire_type(), "message": error.to_string()},
        })),
    )
        .into_response()
}

async fn api_status(State(state): State<Arc<GatewayState>>) -> Response {
    Json(state.status_payload().await).into_response()
}

async fn api_set_workspaces_root(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<PathBody>,
) -> Response {
    match state.set_workspaces_root(&body.path).await {
        Ok(root) => Json(json!({"ok": true, "workspaces_root": root.to_string_lossy()})).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn api_choose_folder(State(_state): State<Arc<GatewayState>>) -> Response {
    if std::env::consts::OS != "macos" {
        return error_response(&Error::InvalidArgument(
            "Finder folder chooser is only available on macOS host".into(),
        ));
    }

    let script = r#"POSIX path of (choose folder with prompt "Choose a workspace parent directory")"#;
    let output = Command::new("osascript").args(["-e", script]).output().await;
    match output {
        Ok(output) if output.status.success() => {
            let selected = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if selected.is_empty() {
                return error_response(&Error::InvalidArgument("No folder selected".into()));
            }
            match super::state::validate_absolute_dir(&selected) {
                Ok(path) => Json(json!({"ok": true, "path": path.to_string_lossy()})).into_response(),
                Err(error) => error_response(&error),
            }
        }
        Ok(output) => {
            let detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error_response(&Error::Internal(if detail.is_empty() {
                "Unable to open Finder picker".into()
            } else {
                detail
            }))
        }
        Err(error) => error_response(&Error::Io(error)),
    }
}

async fn api_create_project(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<CreateProjectBody>,
) -> Response {
    match state.create_project(&body.parent_dir, &body.workspace_name).await {
        Ok(project) => {
            let main_html = resolve_main_html(&project).map(|p| p.to_string_lossy().to_string());
            Json(json!({
                "ok": true,
                "project": project.to_string_lossy(),
                "main_html": main_html,
            }))
            .into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn api_open_project(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<OpenProjectBody>,
) -> Response {
    match state.open_project(&body.project_path).await {
        Ok(project) => {
            let main_html = resolve_main_html(&project).map(|p| p.to_string_lossy().to_string());
            Json(json!({
                "ok": true,
                "project": project.to_string_lossy(),
                "main_html": main_html,
            }))
            .into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn api_open_main_html(State(state): State<Arc<GatewayState>>) -> Response {
    let Some(project) = state.current_project().await else {
        return error_response(&Error::InvalidArgument("No open project".into()));
    };
    let Some(main_html) = resolve_main_html(&project) else {
        return error_response(&Error::InvalidArgument(
            "No index.html or main.html found in current project".into(),
        ));
    };

    let target = main_html.to_string_lossy().to_string();
    let result = match std::env::consts::OS {
        "macos" => Command::new("open").arg(&target).spawn(),
        "windows" => Command::new("cmd").args(["/c", "start", "", &target]).spawn(),
        _ => Command::new("xdg-open").arg(&target).spawn(),
    };
    match result {
        Ok(_) => Json(json!({"ok": true, "main_html": target})).into_response(),
        Err(error) => error_response(&Error::Io(error)),
    }
}

async fn api_clear_chat(State(state): State<Arc<GatewayState>>) -> Response {
    state.clear_chat().await;
    Json(json!({"ok": true})).into_response()
}

async fn api_stop(State(state): State<Arc<GatewayState>>) -> Response {
    let stopped = state.request_stop().await;
    Json(json!({"ok": true, "stopped": stopped})).into_response()
}

// ---------------------------------------------------------------------------
// Chat stream
// ---------------------------------------------------------------------------

async fn api_chat(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<ChatBody>,
) -> Response {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return error_response(&Error::InvalidArgument("Message is required".into()));
    }

    let (project, task) = match state.begin_run(&message).await {
        Ok(claimed) => claimed,
        Err(error) => return error_response(&error),
    };

    let mut child = match spawn_orchestrator(&project, &task) {
        Ok(child) => child,
        Err(error) => {
            state.end_run().await;
            return error_response(&error);
        }
    };
    let stderr = child.stderr.take();
    let stdout = child.stdout.take();
    *state.active_child.lock().await = Some(child);

    let (tx, rx) = mpsc::channel::<Bytes>(64);
    tokio::spawn(relay_run(state.clone(), stderr, stdout, tx));

    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn spawn_orchestrator(project: &Path, task: &str) -> crate::error::Result<tokio::process::Child> {
    let binary = match std::env::var("LCH_ORCHESTRATOR_BIN") {
        Ok(path) if !path.trim().is_empty() => std::path::PathBuf::from(path.trim()),
        _ => {
            let exe = std::env::current_exe()?;
            exe.parent()
                .map(|dir| dir.join("lch-orchestrator"))
                .ok_or_else(|| Error::Internal("Cannot locate orchestrator binary".into()))?
        }
    };

    Command::new(binary)
        .arg("--workspace-root")
        .arg(project)
        .arg("--task")
        .arg(task)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::Io)
}

/// Relay the child's stderr events, then its final stdout JSON, as NDJSON
async fn relay_run(
    state: Arc<GatewayState>,
    stderr: Option<ChildStderr>,
    stdout: Option<ChildStdout>,
    tx: mpsc::Sender<Bytes>,
) {
    let send = |event: UiEvent| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(Bytes::from(event.to_ndjson_line())).await;
        }
    };

    send(UiEvent::status(RunState::Thinking, "thinking...")).await;

    // drain stdout concurrently so a large final JSON cannot deadlock the
    // stderr relay on a full pipe
    let stdout_task = tokio::spawn(async move {
        let mut raw = String::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_string(&mut raw).await;
        }
        raw
    });

    if let Some(stderr) = stderr {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            for event in events_from_stderr_line(&line) {
                send(event).await;
            }
        }
    }

    // stderr closed: the child is exiting
    if let Some(mut child) = state.active_child.lock().await.take() {
        let _ = child.wait().await;
    }
    let stdout_raw = stdout_task.await.unwrap_or_default();
    let stop_requested = state.end_run().await;

    if stop_requested {
        send(UiEvent::Stopped {
            message: "Run stopped by user.".to_string(),
        })
        .await;
        send(UiEvent::status(RunState::Idle, "stopped")).await;
        send(UiEvent::Done).await;
        return;
    }

    let parsed: Option<Value> = serde_json::from_str(stdout_raw.trim()).ok();
    let Some(parsed) = parsed else {
        warn!("Unparseable orchestrator output ({} bytes)", stdout_raw.len());
        let tail: String = stdout_raw
            .chars()
            .rev()
            .take(1000)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        send(UiEvent::Error {
            message: "Unable to parse orchestrator result".to_string(),
            detail: (!tail.is_empty()).then_some(tail),
        })
        .await;
        send(UiEvent::Done).await;
        return;
    };

    let result = parsed.get("orchestrator_result").cloned().unwrap_or(Value::Null);

    // replay the executed tool trace as action events
    if let Some(trace) = result.get("tool_trace").and_then(Value::as_array) {
        for item in trace {
            let tool = item.get("tool").and_then(Value::as_str).unwrap_or_default();
            if tool.is_empty() {
                continue;
            }
            let arguments = item.get("arguments").cloned().unwrap_or(Value::Null);
            send(UiEvent::Action {
                tool: tool.to_string(),
                arguments: arguments.clone(),
                live: None,
            })
            .await;
            if tool == "create_file" {
                if let Some(rel) = arguments.get("relative_path").and_then(Value::as_str) {
                    if !rel.trim().is_empty() {
                        send(UiEvent::Action {
                            tool: "file_edit".to_string(),
                            arguments: json!({"relative_path": rel}),
                            live: None,
                        })
                        .await;
                    }
                }
            }
        }
    }

    let mut final_message = result
        .get("summary")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .or_else(|| result.get("final_message").and_then(Value::as_str))
        .unwrap_or("")
        .trim()
        .to_string();
    if final_message.is_empty() {
        final_message = "No final response returned.".to_string();
    }

    // progressively longer prefixes, word by word
    let words: Vec<&str> = final_message.split(' ').collect();
    let mut chunk = String::new();
    for word in words {
        if chunk.is_empty() {
            chunk.push_str(word);
        } else {
            chunk.push(' ');
            chunk.push_str(word);
        }
        send(UiEvent::ChatChunk { text: chunk.clone() }).await;
    }

    state.push_history("assistant", &final_message).await;
    send(UiEvent::ChatFinal {
        text: final_message,
    })
    .await;
    send(UiEvent::status(RunState::Idle, "done")).await;
    send(UiEvent::Done).await;
    info!("Chat run relay finished");
}

// ---------------------------------------------------------------------------
// Static assets and workspace proxy
// ---------------------------------------------------------------------------

async fn serve_index(State(state): State<Arc<GatewayState>>) -> Response {
    serve_asset(&state, "index.html", "text/html; charset=utf-8").await
}

async fn serve_style(State(state): State<Arc<GatewayState>>) -> Response {
    serve_asset(&state, "style.css", "text/css; charset=utf-8").await
}

async fn serve_script(State(state): State<Arc<GatewayState>>) -> Response {
    serve_asset(&state, "script.js", "application/javascript; charset=utf-8").await
}

async fn serve_asset(state: &GatewayState, file_name: &str, content_type: &'static str) -> Response {
    let target = state.config.assets_dir.join(file_name);
    match tokio::fs::read(&target).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type)],
            bytes,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "File not found"})),
        )
            .into_response(),
    }
}

async fn workspace_file(
    State(state): State<Arc<GatewayState>>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    let Some(project) = state.current_project().await else {
        return error_response(&Error::InvalidArgument("No open project".into()));
    };
    let resolved = match crate::sandbox::resolve_path_in_workspace(&project, &path) {
        Ok(resolved) => resolved,
        Err(error) => {
            error!("Workspace proxy rejected {path}: {error}");
            return error_response(&error);
        }
    };
    match tokio::fs::read(&resolved).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&resolved))],
            bytes,
        )
            .into_response(),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "File not found"})),
        )
            .into_response(),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "txt" | "log" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    }
}
