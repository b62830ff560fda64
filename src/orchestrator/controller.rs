//! The staged pipeline loop
//!
//! One controller instance drives one run: per iteration it refreshes
//! project memory, plans, curates tools (embedding retrieval → rerank →
//! stage-required force-include), calls the model, normalizes and dispatches
//! the tool calls, and applies the progress and termination guards. Stages
//! advance `plan` → `code` → `validate`; the run ends on an accepted
//! completion signal, a stop signal, a guard trigger, or stage exhaustion.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::llm::extract::{call_signature, strip_think_tags};
use crate::llm::{ChatCallOptions, Message, OllamaClient, ToolCallRequest, ToolDefinition};
use crate::memory::{ProjectMemory, SessionMemory};
use crate::planner::Planner;
use crate::pruner::{Candidate, ToolPruner};
use crate::reranker::ToolReranker;
use crate::tools::{build_registry, host, ToolRegistry};
use crate::trace::{self, EventLog};

use super::guards::{Deferral, IterationState};
use super::normalize::{
    is_edit_tool, is_write_tool, normalize_tool_calls, write_target,
};
use super::stages::{Stage, COMPLETION_PREFIX, STOP_PREFIX};
use super::summary::synthesize_summary;

/// System prompt opening every run
pub const SYSTEM_PROMPT: &str = "You are an autonomous coding agent building a plain HTML/CSS/JS \
web app inside a sandboxed workspace. Use tools when needed, reason step-by-step, write complete \
files, and reply with a line starting with DONE: when the objective is fully complete. If you \
cannot make progress, reply with a line starting with GIVE_UP: and explain why.";

const NUDGE_PROMPT: &str = "Your last reply was empty. Continue the current stage: call the \
appropriate tool, or report concrete progress. Do not send an empty message.";

/// Hard cap on dispatched tool calls per iteration
const MAX_CALLS_PER_ITERATION: usize = 8;
/// Retrieval depth into project memory per iteration
const MEMORY_RETRIEVAL_TOP_K: usize = 5;

const KEY_FILE_EXTENSIONS: [&str; 6] = ["html", "css", "js", "json", "md", "txt"];
const MAX_KEY_FILES: usize = 30;
const MAX_KEY_FILE_BYTES: usize = 10_240;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Completion signal accepted or all stages executed
    Completed,
    /// Iteration budget exhausted
    MaxLoopsReached,
    /// No file changed for too many iterations
    StoppedNoProgress,
    /// The model kept issuing the identical tool batch
    StoppedRepeatedCalls,
    /// The model gave up explicitly
    StoppedByAgent,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::MaxLoopsReached => "max_loops_reached",
            RunStatus::StoppedNoProgress => "stopped_no_progress",
            RunStatus::StoppedRepeatedCalls => "stopped_repeated_calls",
            RunStatus::StoppedByAgent => "stopped_by_agent",
        }
    }
}

/// One executed (or deferred) tool call in the run trace
#[derive(Debug, Clone, Serialize)]
pub struct ToolTraceEntry {
    pub iteration: u32,
    pub stage: String,
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
}

/// Final result of a run
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub ok: bool,
    pub status: RunStatus,
    pub iterations: u32,
    pub final_message: String,
    pub summary: String,
    pub changed_files: Vec<String>,
    pub tool_trace: Vec<ToolTraceEntry>,
}

/// Extra knobs beyond [`OrchestratorConfig`]
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Tools sent to the model after curation
    pub top_k_tools: usize,
    /// Embedding candidates retrieved before reranking
    pub candidate_pool_size: usize,
    /// Override for the tool-vectors file (defaults into the workspace log dir)
    pub vectors_path: Option<PathBuf>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            top_k_tools: 5,
            candidate_pool_size: 8,
            vectors_path: None,
        }
    }
}

/// The loop controller for one run
pub struct LoopController {
    workspace_root: PathBuf,
    client: OllamaClient,
    config: OrchestratorConfig,
    options: ControllerOptions,
    planner: Planner,
    reranker: ToolReranker,
    pruner: ToolPruner,
    registry: ToolRegistry,
    project_memory: ProjectMemory,
    memory: SessionMemory,
    state: IterationState,
    trace: Vec<ToolTraceEntry>,
}

/// Result of dispatching one iteration's tool calls
struct DispatchOutcome {
    files_changed: u32,
    signatures: Vec<String>,
}

impl LoopController {
    /// Build a controller and its collaborators for one workspace
    pub fn new(
        workspace_root: PathBuf,
        client: OllamaClient,
        config: OrchestratorConfig,
        options: ControllerOptions,
    ) -> Result<Self> {
        let registry = build_registry(&workspace_root)?;
        let vectors_path = options.vectors_path.clone().unwrap_or_else(|| {
            workspace_root
                .join(trace::LOG_DIR_NAME)
                .join("tool_vectors.json")
        });

        let planner = Planner::new(client.clone(), config.chat_model.clone(), config.fast_mode);
        let reranker = ToolReranker::new(client.clone(), config.chat_model.clone());
        let pruner = ToolPruner::new(
            client.clone(),
            config.embedding_model.clone(),
            vectors_path,
            EventLog::for_workspace(&workspace_root, "tool_pruning.log"),
        );
        let project_memory = ProjectMemory::new(
            workspace_root.clone(),
            client.clone(),
            config.embedding_model.clone(),
            EventLog::for_workspace(&workspace_root, "orchestrator_events.log"),
        );

        let workspace_started_empty = workspace_is_empty(&workspace_root);
        Ok(LoopController {
            workspace_root,
            client,
            config,
            options,
            planner,
            reranker,
            pruner,
            registry,
            project_memory,
            memory: SessionMemory::new(),
            state: IterationState::new(workspace_started_empty),
            trace: Vec::new(),
        })
    }

    /// Run the staged pipeline for one task
    pub async fn run(&mut self, task: &str) -> Result<RunOutcome> {
        self.memory.add(Message::system(SYSTEM_PROMPT));
        self.memory.add(Message::user(task));

        if !self.state.workspace_started_empty {
            if let Some(context) = gather_key_files(&self.workspace_root) {
                for path in key_file_paths(&self.workspace_root) {
                    self.state.record_read(&path);
                }
                self.memory.add(Message::user(context));
            }
        }

        let catalog = self.registry.definitions();
        let known_tools: Vec<String> = catalog
            .iter()
            .map(|tool| tool.name().to_string())
            .collect();

        let max_iterations = self.config.max_loops.max(Stage::SEQUENCE.len() as u32);
        let code_stage_cap = max_iterations.saturating_sub(2).max(1);

        let mut stage_idx = 0usize;
        let mut iterations_in_stage = 0u32;
        let mut iteration = 0u32;
        let mut status: Option<RunStatus> = None;
        let mut final_message = String::new();

        while iteration < max_iterations && stage_idx < Stage::SEQUENCE.len() {
            iteration += 1;
            self.state.iteration_index = iteration;
            iterations_in_stage += 1;
            let stage = Stage::SEQUENCE[stage_idx];
            info!("Iteration {}/{} stage={}", iteration, max_iterations, stage);
            trace::emit_status(stage.name());

            // 1. bring the file index up to date
            self.project_memory.refresh().await?;

            // 2. plan this iteration
            let plan = self
                .planner
                .plan_step(task, iteration, self.memory.recent(4))
                .await?;
            self.state.active_phase = plan.active_phase.clone();
            self.state.push_rationale(&plan.rationale);
            trace::emit_response("planner", &serde_json::to_value(&plan).unwrap_or_default());

            // 3. curate the tool subset
            let retrieval = self
                .pruner
                .retrieve_candidates(&plan.retrieval_query, &catalog, self.options.candidate_pool_size)
                .await?;
            let rerank = self
                .reranker
                .rerank(task, &plan, &retrieval.candidates, self.options.top_k_tools)
                .await?;
            trace::emit_response("reranker", &rerank.report);
            let selected = curate_tools(stage, &rerank.selected, &catalog, self.options.top_k_tools);

            // 4. retrieval context from project memory
            let hits = self
                .project_memory
                .retrieve(&plan.retrieval_query, MEMORY_RETRIEVAL_TOP_K)
                .await?;
            let context = self.project_memory.build_retrieval_context(&hits, 2, 12_000);

            // 5. call the model with the stage prompt
            let stage_prompt = stage.build_prompt(task, &plan, &context);
            self.memory.add(Message::user(stage_prompt));

            let chat_options = ChatCallOptions {
                stream: true,
                stream_label: Some(stage.name().to_string()),
                num_ctx: Some(self.config.num_ctx),
                num_predict: Some(if stage == Stage::Code {
                    self.config.num_predict_code
                } else {
                    self.config.num_predict
                }),
            };
            let mut response = self
                .client
                .chat(
                    &self.config.chat_model,
                    self.memory.messages.clone(),
                    selected.clone(),
                    chat_options.clone(),
                )
                .await?;
            let mut calls = self.client.extract_tool_calls(&response.message);

            // 6. one nudge retry on a fully empty response
            if response.message.content.trim().is_empty() && calls.is_empty() {
                warn!("Empty model response; nudging once");
                self.memory.add(Message::user(NUDGE_PROMPT));
                response = self
                    .client
                    .chat(
                        &self.config.chat_model,
                        self.memory.messages.clone(),
                        selected.clone(),
                        chat_options,
                    )
                    .await?;
                calls = self.client.extract_tool_calls(&response.message);
            }

            self.memory.add(response.message.clone());
            let content = strip_think_tags(&response.message.content).trim().to_string();

            // 7. explicit stop
            if content.starts_with(STOP_PREFIX) {
                status = Some(RunStatus::StoppedByAgent);
                final_message = content;
                break;
            }

            // 8. explicit completion, gated on the gap list
            let mut completion_nudged = false;
            if content.starts_with(COMPLETION_PREFIX) {
                let gaps = self.state.completion_gaps(self.config.min_build_iterations);
                if gaps.is_empty() {
                    status = Some(RunStatus::Completed);
                    final_message = content;
                    break;
                }
                self.nudge_completion_gaps(&gaps);
                completion_nudged = true;
            }

            // 9. normalize + dedup + dispatch
            let normalized = normalize_tool_calls(calls, &known_tools, &self.workspace_root);
            let had_calls = !normalized.is_empty();
            let dispatch = self.execute_calls(stage, iteration, normalized).await?;

            // 10. forced completion normalization: prose that reads as done
            if !had_calls
                && !completion_nudged
                && !content.is_empty()
                && looks_like_completion(&content)
            {
                let gaps = self.state.completion_gaps(self.config.min_build_iterations);
                if gaps.is_empty() {
                    status = Some(RunStatus::Completed);
                    final_message = format!("{COMPLETION_PREFIX} {content}");
                    break;
                }
                self.nudge_completion_gaps(&gaps);
            }

            if !content.is_empty() {
                final_message = content;
            }

            // 11. guards
            let files_changed = dispatch.files_changed > 0;
            let streak = self.state.record_iteration_progress(files_changed);
            if streak >= self.config.max_no_progress {
                status = Some(RunStatus::StoppedNoProgress);
                break;
            }

            let mut signatures = dispatch.signatures;
            signatures.sort();
            let iteration_signature = signatures.join(";");
            if self
                .state
                .record_iteration_signature(iteration_signature, files_changed)
            {
                status = Some(RunStatus::StoppedRepeatedCalls);
                break;
            }

            // 12. stage advancement
            let advance = match stage {
                Stage::Plan => true,
                Stage::Code => {
                    let built = self.state.html_written
                        && self.state.css_written
                        && self.state.js_written;
                    built
                        || (!had_calls && self.state.substantive_edit_count > 0)
                        || iterations_in_stage >= code_stage_cap
                }
                Stage::Validate => true,
            };
            if advance {
                stage_idx += 1;
                iterations_in_stage = 0;
            }

            // 13. keep the transcript inside the byte budget
            self.memory.compact_if_needed(self.config.memory_budget_bytes);
        }

        let status = status.unwrap_or(if stage_idx >= Stage::SEQUENCE.len() {
            RunStatus::Completed
        } else {
            RunStatus::MaxLoopsReached
        });

        if final_message.is_empty() {
            final_message = "Loop stopped before completion".to_string();
        }

        let changed_files: Vec<String> = self.state.changed_files.iter().cloned().collect();
        self.project_memory.refresh().await.ok();
        let summary = synthesize_summary(
            &self.client,
            &self.config,
            &self.project_memory,
            task,
            status.as_str(),
            &changed_files,
        )
        .await;

        info!(
            "Run finished: status={} iterations={} changed_files={}",
            status.as_str(),
            iteration,
            changed_files.len()
        );

        Ok(RunOutcome {
            ok: status == RunStatus::Completed,
            status,
            iterations: iteration,
            final_message,
            summary,
            changed_files,
            tool_trace: std::mem::take(&mut self.trace),
        })
    }

    /// Dispatch one iteration's normalized calls against the tool host
    async fn execute_calls(
        &mut self,
        stage: Stage,
        iteration: u32,
        calls: Vec<ToolCallRequest>,
    ) -> Result<DispatchOutcome> {
        let mut files_changed = 0u32;
        let mut writes_accepted = 0usize;
        let mut signatures = Vec::new();

        for call in calls.into_iter().take(MAX_CALLS_PER_ITERATION) {
            if !stage.allows(&call.name) {
                debug!("Dropping out-of-stage call: {} in {}", call.name, stage);
                continue;
            }

            let is_write = is_write_tool(&call.name);
            let target = write_target(&call);
            if is_write {
                if target.is_none() {
                    debug!("Skipping write with empty path: {}", call.name);
                    continue;
                }
                if call.name == "create_file"
                    && call
                        .arguments
                        .get("content")
                        .and_then(Value::as_str)
                        .map(str::is_empty)
                        .unwrap_or(true)
                {
                    debug!("Skipping create_file with empty content");
                    continue;
                }
                if writes_accepted >= self.config.max_files_per_iteration {
                    debug!("File cap reached; skipping {}", call.name);
                    continue;
                }
            }

            signatures.push(call_signature(&call));

            // read-before-write: an existing file written after its last read
            // must be re-read before the next edit
            if is_edit_tool(&call.name) {
                if let Some(path) = target.as_deref() {
                    let on_disk = crate::sandbox::resolve_path_in_workspace(&self.workspace_root, path)
                        .map(|resolved| resolved.is_file())
                        .unwrap_or(false);
                    if on_disk && self.state.needs_read_before_write(path) {
                        self.defer_for_reread(iteration, stage, &call, path);
                        continue;
                    }
                }
            }

            // validation/tests deferral ladder
            if call.name == "validate_web_app" {
                if let Deferral::Defer(reason) = self.state.validation_decision() {
                    self.record_deferred(iteration, stage, &call, &reason);
                    continue;
                }
            }
            if call.name == "run_unit_tests" {
                if let Deferral::Defer(reason) = self.state.tests_decision() {
                    self.record_deferred(iteration, stage, &call, &reason);
                    continue;
                }
            }

            trace::emit_tool_call(&json!({
                "tool": call.name,
                "arguments": call.arguments,
                "live": true,
            }));
            let result = match self.registry.call_tool(&call.name, &call.arguments).await {
                Ok(inner) => inner,
                Err(error) if error.is_run_fatal() => return Err(error),
                Err(error) => host::error_envelope(&error),
            };
            let ok = result.get("ok").and_then(Value::as_bool).unwrap_or(false);

            match call.name.as_str() {
                "read_file" => {
                    if ok {
                        if let Some(path) = call.arguments.get("relative_path").and_then(Value::as_str)
                        {
                            self.state.record_read(path);
                        }
                    }
                }
                "validate_web_app" => self.state.record_validation(ok),
                "run_unit_tests" => self.state.record_tests(ok),
                _ => {}
            }

            if is_write && ok {
                if call.name == "scaffold_web_app" {
                    let dir = target.clone().unwrap_or_default();
                    for name in ["index.html", "styles.css", "app.js", "tests.js"] {
                        let path = format!("{}/{}", dir.trim_end_matches('/'), name);
                        self.state.record_write(&path);
                        self.project_memory.mark_touched(&path);
                    }
                } else if let Some(path) = target.as_deref() {
                    self.state.record_write(path);
                    self.project_memory.mark_touched(path);
                }
                writes_accepted += 1;
                files_changed += 1;
            }

            self.push_trace(iteration, stage, &call, result.clone());
            self.memory
                .add(Message::tool(call.name.clone(), result.to_string()));

            if !ok {
                self.memory.add(Message::user(summarize_failure(&call.name, &result)));
            }
        }

        Ok(DispatchOutcome {
            files_changed,
            signatures,
        })
    }

    /// Defer a structured edit and inject the current file content so the
    /// model can reissue the call against what is really on disk
    fn defer_for_reread(
        &mut self,
        iteration: u32,
        stage: Stage,
        call: &ToolCallRequest,
        path: &str,
    ) {
        let result = json!({
            "ok": true,
            "deferred": true,
            "reason": format!("{path} changed since it was last read; re-issue the edit against the current content"),
        });
        self.push_trace(iteration, stage, call, result.clone());
        self.memory
            .add(Message::tool(call.name.clone(), result.to_string()));

        let content = self.project_memory.read_full_file(path);
        let rationales = self.state.recent_rationales();
        let rationale_text = if rationales.is_empty() {
            "- none".to_string()
        } else {
            rationales
                .iter()
                .map(|line| format!("- {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.memory.add(Message::user(format!(
            "The file {path} changed since you last read it. Current content:\n```\n{content}\n```\n\
Recent plan rationale:\n{rationale_text}\n\
Re-issue the edit against this exact content.",
        )));
        self.state.record_read(path);
    }

    fn record_deferred(&mut self, iteration: u32, stage: Stage, call: &ToolCallRequest, reason: &str) {
        debug!("Deferring {}: {}", call.name, reason);
        let result = json!({"ok": true, "deferred": true, "reason": reason});
        self.push_trace(iteration, stage, call, result.clone());
        self.memory
            .add(Message::tool(call.name.clone(), result.to_string()));
    }

    fn nudge_completion_gaps(&mut self, gaps: &[String]) {
        let listing = gaps
            .iter()
            .map(|gap| format!("- {gap}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.memory.add(Message::user(format!(
            "Not done yet. The following gaps remain before the build can be accepted:\n{listing}\n\
Close them with the stage tools, then signal completion again.",
        )));
    }

    fn push_trace(&mut self, iteration: u32, stage: Stage, call: &ToolCallRequest, result: Value) {
        self.trace.push(ToolTraceEntry {
            iteration,
            stage: stage.name().to_string(),
            tool: call.name.clone(),
            arguments: call.arguments.clone(),
            result,
        });
    }
}

/// Required tools first, then the reranked selection, capped at `top_k`
/// (never below the required set)
fn curate_tools(
    stage: Stage,
    selected: &[Candidate],
    catalog: &[ToolDefinition],
    top_k: usize,
) -> Vec<ToolDefinition> {
    let mut names: Vec<String> = Vec::new();
    let mut tools: Vec<ToolDefinition> = Vec::new();

    for required in stage.required_tools() {
        if let Some(tool) = catalog.iter().find(|tool| tool.name() == *required) {
            names.push(required.to_string());
            tools.push(tool.clone());
        }
    }
    for candidate in selected {
        if names.iter().any(|name| name == &candidate.name) {
            continue;
        }
        names.push(candidate.name.clone());
        tools.push(candidate.tool.clone());
    }

    let cap = top_k.max(stage.required_tools().len()).max(1);
    tools.truncate(cap);
    tools
}

fn looks_like_completion(content: &str) -> bool {
    let lower = content.to_lowercase();
    ["complete", "completed", "finished", "all set", "everything passes"]
        .iter()
        .any(|marker| lower.contains(marker))
}

fn summarize_failure(tool_name: &str, result: &Value) -> String {
    let error_message = result
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let stdout = result.get("stdout").and_then(Value::as_str).unwrap_or("");
    let stderr = result.get("stderr").and_then(Value::as_str).unwrap_or("");

    let mut message = format!("Tool {tool_name} failed: {error_message}");
    for key in ["missing_files", "issues"] {
        if let Some(items) = result.get(key).and_then(Value::as_array) {
            if !items.is_empty() {
                let listing: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                message.push_str(&format!("\n{key}: {}", listing.join(", ")));
            }
        }
    }
    if !stdout.trim().is_empty() {
        message.push_str(&format!("\nstdout:\n{}", truncate(stdout, 1000)));
    }
    if !stderr.trim().is_empty() {
        message.push_str(&format!("\nstderr:\n{}", truncate(stderr, 1000)));
    }
    message.push_str("\nFix the problem and continue.");
    message
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect::<String>() + "..."
    }
}

fn workspace_is_empty(workspace_root: &std::path::Path) -> bool {
    key_file_walk(workspace_root).next().is_none()
}

fn key_file_walk(
    workspace_root: &std::path::Path,
) -> impl Iterator<Item = (String, PathBuf)> + '_ {
    WalkDir::new(workspace_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let rel = entry
                .path()
                .strip_prefix(workspace_root)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");
            if rel.split('/').any(|part| part.starts_with('.') || part == "node_modules") {
                return None;
            }
            Some((rel, entry.path().to_path_buf()))
        })
}

fn key_file_paths(workspace_root: &std::path::Path) -> Vec<String> {
    let mut paths: Vec<String> = key_file_walk(workspace_root)
        .filter(|(rel, _)| {
            KEY_FILE_EXTENSIONS
                .iter()
                .any(|ext| rel.to_lowercase().ends_with(&format!(".{ext}")))
        })
        .map(|(rel, _)| rel)
        .collect();
    paths.sort();
    paths.truncate(MAX_KEY_FILES);
    paths
}

/// Read the key files of a populated workspace into one context message
fn gather_key_files(workspace_root: &std::path::Path) -> Option<String> {
    let mut entries: Vec<(String, PathBuf)> = key_file_walk(workspace_root)
        .filter(|(rel, _)| {
            KEY_FILE_EXTENSIONS
                .iter()
                .any(|ext| rel.to_lowercase().ends_with(&format!(".{ext}")))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.truncate(MAX_KEY_FILES);
    if entries.is_empty() {
        return None;
    }

    let mut sections = vec![
        "Existing project files (learn this structure; all edits must stay consistent with it):"
            .to_string(),
    ];
    for (rel, path) in entries {
        let Ok(raw) = std::fs::read(&path) else {
            continue;
        };
        let capped = &raw[..raw.len().min(MAX_KEY_FILE_BYTES)];
        let content = String::from_utf8_lossy(capped);
        sections.push(format!("--- FILE: {rel} ---\n{content}"));
    }
    Some(sections.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller(dir: &TempDir, fast_mode: bool) -> LoopController {
        let root = dir.path().canonicalize().unwrap();
        let config = OrchestratorConfig {
            fast_mode,
            mock_tool_call: true,
            ..Default::default()
        };
        LoopController::new(root, OllamaClient::mock(), config, ControllerOptions::default())
            .unwrap()
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn mock_run_terminates_with_a_guard() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);
        let outcome = controller.run("build a hello page").await.unwrap();

        // the mock transport only ever answers DONE: with every gap open, so
        // the no-progress guard must end the run
        assert_eq!(outcome.status, RunStatus::StoppedNoProgress);
        assert!(!outcome.ok);
        assert_eq!(outcome.iterations, 3);
        assert!(!outcome.final_message.is_empty());
        assert!(!outcome.summary.is_empty());
    }

    #[tokio::test]
    async fn dispatch_executes_writes_and_tracks_state() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);

        let outcome = controller
            .execute_calls(
                Stage::Code,
                1,
                vec![
                    call(
                        "create_file",
                        json!({"relative_path": "app/index.html", "content": "<html></html>", "overwrite": true}),
                    ),
                    // out-of-stage: dropped silently
                    call("validate_web_app", json!({"app_dir": "app"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.files_changed, 1);
        assert!(dir.path().join("app/index.html").is_file());
        assert!(controller.state.html_written);
        assert_eq!(controller.trace.len(), 1);
        assert_eq!(controller.trace[0].tool, "create_file");
        assert_eq!(controller.trace[0].result["ok"], true);
    }

    #[tokio::test]
    async fn early_validation_is_deferred_with_envelope() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/index.html"), "<html></html>").unwrap();
        controller.state.record_write("app/index.html");

        let outcome = controller
            .execute_calls(
                Stage::Validate,
                2,
                vec![call("validate_web_app", json!({"app_dir": "app"}))],
            )
            .await
            .unwrap();

        assert_eq!(outcome.files_changed, 0);
        assert_eq!(controller.trace.len(), 1);
        assert_eq!(controller.trace[0].result["deferred"], true);
        assert_eq!(controller.state.validation_runs, 0);
    }

    #[tokio::test]
    async fn validation_runs_once_the_file_set_is_complete() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);

        controller
            .execute_calls(
                Stage::Code,
                1,
                vec![call("scaffold_web_app", json!({"app_dir": "app"}))],
            )
            .await
            .unwrap();
        assert!(controller.state.html_written && controller.state.css_written);

        let outcome = controller
            .execute_calls(
                Stage::Validate,
                2,
                vec![call("validate_web_app", json!({"app_dir": "app"}))],
            )
            .await
            .unwrap();
        assert_eq!(outcome.files_changed, 0);
        assert_eq!(controller.state.validation_runs, 1);
        assert!(controller.state.last_validation_ok);
        let entry = controller.trace.last().unwrap();
        assert_eq!(entry.result["ok"], true);
        assert_eq!(entry.result["missing_files"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn structured_edit_requires_reread_after_write() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);

        controller
            .execute_calls(
                Stage::Code,
                1,
                vec![call(
                    "create_file",
                    json!({"relative_path": "app.js", "content": "let a = 1;\n", "overwrite": true}),
                )],
            )
            .await
            .unwrap();

        // the file was written but never re-read: the structured edit defers
        let outcome = controller
            .execute_calls(
                Stage::Code,
                2,
                vec![call(
                    "append_to_file",
                    json!({"relative_path": "app.js", "content": "let b = 2;\n"}),
                )],
            )
            .await
            .unwrap();
        assert_eq!(outcome.files_changed, 0);
        assert_eq!(controller.trace.last().unwrap().result["deferred"], true);
        // the deferral injected the content, so the reissued call runs
        let outcome = controller
            .execute_calls(
                Stage::Code,
                3,
                vec![call(
                    "append_to_file",
                    json!({"relative_path": "app.js", "content": "let b = 2;\n"}),
                )],
            )
            .await
            .unwrap();
        assert_eq!(outcome.files_changed, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.js")).unwrap(),
            "let a = 1;\nlet b = 2;\n"
        );
    }

    #[tokio::test]
    async fn empty_write_paths_and_contents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);
        let outcome = controller
            .execute_calls(
                Stage::Code,
                1,
                vec![
                    call("create_file", json!({"relative_path": "", "content": "x"})),
                    call("create_file", json!({"relative_path": "a.txt", "content": ""})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome.files_changed, 0);
        assert!(controller.trace.is_empty());
    }

    #[tokio::test]
    async fn failed_calls_append_feedback_to_memory() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller(&dir, true);
        controller
            .execute_calls(
                Stage::Code,
                1,
                vec![call(
                    "append_to_file",
                    json!({"relative_path": "missing.txt", "content": "x"}),
                )],
            )
            .await
            .unwrap();

        let entry = controller.trace.last().unwrap();
        assert_eq!(entry.result["ok"], false);
        assert_eq!(entry.result["error"]["type"], "ValueError");
        let last = controller.memory.messages.last().unwrap();
        assert!(last.content.contains("Tool append_to_file failed"));
    }

    #[test]
    fn curation_forces_required_tools_first() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(&dir.path().canonicalize().unwrap()).unwrap();
        let catalog = registry.definitions();

        let selected: Vec<Candidate> = catalog
            .iter()
            .filter(|tool| tool.name() == "read_file" || tool.name() == "list_directory")
            .map(|tool| Candidate {
                name: tool.name().to_string(),
                description: String::new(),
                score: 0.5,
                tool: tool.clone(),
            })
            .collect();

        let curated = curate_tools(Stage::Code, &selected, &catalog, 2);
        let names: Vec<&str> = curated.iter().map(|tool| tool.name()).collect();
        assert_eq!(names[0], "create_file");
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn workspace_emptiness_ignores_hidden_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "x").unwrap();
        assert!(workspace_is_empty(dir.path()));

        std::fs::write(dir.path().join("index.html"), "x").unwrap();
        assert!(!workspace_is_empty(dir.path()));
    }

    #[test]
    fn key_file_context_reads_known_extensions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>x</html>").unwrap();
        std::fs::write(dir.path().join("photo.png"), [0u8, 1, 2]).unwrap();

        let context = gather_key_files(dir.path()).unwrap();
        assert!(context.contains("--- FILE: index.html ---"));
        assert!(!context.contains("photo.png"));
    }
}
