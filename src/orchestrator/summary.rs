//! Run-summary synthesis
//!
//! One final no-tools LLM call turns the run into a user-facing markdown
//! summary. Any failure falls back to a templated listing of the changed
//! files so the chat always ends with something readable.

use crate::config::OrchestratorConfig;
use crate::llm::{ChatCallOptions, Message, OllamaClient};
use crate::memory::ProjectMemory;
use tracing::warn;

/// Character cap per file snippet included in the summary prompt
const SNIPPET_CHARS: usize = 400;
/// Files included in the summary prompt
const MAX_SNIPPET_FILES: usize = 8;

/// Synthesize the final chat message for a finished run
pub async fn synthesize_summary(
    client: &OllamaClient,
    config: &OrchestratorConfig,
    project_memory: &ProjectMemory,
    task: &str,
    status: &str,
    changed_files: &[String],
) -> String {
    let prompt = build_prompt(project_memory, task, status, changed_files);
    let response = client
        .chat(
            &config.chat_model,
            vec![Message::user(prompt)],
            vec![],
            ChatCallOptions::buffered(),
        )
        .await;

    match response {
        Ok(response) if !response.message.content.trim().is_empty() => {
            response.message.content.trim().to_string()
        }
        Ok(_) => fallback_summary(status, changed_files),
        Err(error) => {
            warn!("Summary synthesis failed, using template: {}", error);
            fallback_summary(status, changed_files)
        }
    }
}

fn build_prompt(
    project_memory: &ProjectMemory,
    task: &str,
    status: &str,
    changed_files: &[String],
) -> String {
    let mut sections = vec![format!(
        "Write a short, user-facing markdown summary of a finished web-app build.\n\
Describe what was built and how to open it. Do not mention tools or internal stages.\n\n\
Original request:\n{task}\n\nRun status: {status}\n"
    )];

    if changed_files.is_empty() {
        sections.push("No files were created or modified.".to_string());
    } else {
        sections.push(format!("Created or modified files:\n{}", bullet_list(changed_files)));
        for path in changed_files.iter().take(MAX_SNIPPET_FILES) {
            let content = project_memory.read_full_file(path);
            if content.is_empty() {
                continue;
            }
            let snippet: String = content.chars().take(SNIPPET_CHARS).collect();
            sections.push(format!("--- {path} (excerpt) ---\n{snippet}"));
        }
    }

    sections.join("\n")
}

/// Templated summary used when the model cannot produce one
pub fn fallback_summary(status: &str, changed_files: &[String]) -> String {
    if changed_files.is_empty() {
        return format!("Build finished with status `{status}`. No files were changed.");
    }
    format!(
        "Build finished with status `{status}`.\n\nChanged files:\n{}",
        bullet_list(changed_files)
    )
}

fn bullet_list(paths: &[String]) -> String {
    paths
        .iter()
        .map(|path| format!("- {path}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_lists_changed_files() {
        let summary = fallback_summary(
            "completed",
            &["app/index.html".to_string(), "app/app.js".to_string()],
        );
        assert!(summary.contains("`completed`"));
        assert!(summary.contains("- app/index.html"));
        assert!(summary.contains("- app/app.js"));

        let empty = fallback_summary("stopped_no_progress", &[]);
        assert!(empty.contains("No files were changed"));
    }
}
