//! Environment-driven configuration
//!
//! Every knob is an environment variable with a default, so a bare
//! `lch-orchestrator --workspace-root … --task …` works against a local
//! Ollama without any config files. Binaries call `dotenvy::dotenv()` before
//! reading.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the loop controller and its collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ollama-compatible API base URL
    pub base_url: String,
    /// Chat model name
    pub chat_model: String,
    /// Embedding model name used for tool pruning and project memory
    pub embedding_model: String,
    /// Maximum loop iterations across all stages
    pub max_loops: u32,
    /// Session-memory byte budget before compaction
    pub memory_budget_bytes: usize,
    /// Minimum iterations before a completion signal is accepted
    pub min_build_iterations: u32,
    /// Iterations without progress before the run is stopped
    pub max_no_progress: u32,
    /// Maximum accepted file-writing tool calls per iteration
    pub max_files_per_iteration: usize,
    /// Context window tokens requested from the model
    pub num_ctx: u32,
    /// Output token budget for plan/validate stages
    pub num_predict: u32,
    /// Output token budget for the code stage
    pub num_predict_code: u32,
    /// Fast mode: deterministic planner, no planning LLM calls
    pub fast_mode: bool,
    /// Mock transport: deterministic chat/embed responses for tests
    pub mock_tool_call: bool,
    /// Compute backend preference (auto|cuda|mps|cpu)
    pub device: String,
}

impl OrchestratorConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        OrchestratorConfig {
            base_url: env_string("OLLAMA_BASE_URL", "http://localhost:11434"),
            chat_model: env_string("CHAT_MODEL", "qwen2.5-coder:14b"),
            embedding_model: env_string("EMBEDDING_MODEL", "nomic-embed-text"),
            max_loops: env_parse("ORCHESTRATOR_MAX_LOOPS", 5),
            memory_budget_bytes: env_parse("ORCHESTRATOR_MEMORY_BUDGET_BYTES", 60_000),
            min_build_iterations: env_parse("ORCHESTRATOR_MIN_BUILD_ITERATIONS", 2),
            max_no_progress: env_parse("ORCHESTRATOR_MAX_NO_PROGRESS", 3),
            max_files_per_iteration: env_parse("ORCHESTRATOR_MAX_FILES_PER_ITERATION", 6),
            num_ctx: env_parse("ORCHESTRATOR_NUM_CTX", 8192),
            num_predict: env_parse("ORCHESTRATOR_NUM_PREDICT", 2048),
            num_predict_code: env_parse("ORCHESTRATOR_NUM_PREDICT_CODE", 4096),
            fast_mode: env_flag("ORCHESTRATOR_FAST_MODE"),
            mock_tool_call: env_flag("ORCHESTRATOR_MOCK_TOOLCALL"),
            device: env_string("COMPILOT_DEVICE", "auto"),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            base_url: "http://localhost:11434".to_string(),
            chat_model: "qwen2.5-coder:14b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            max_loops: 5,
            memory_budget_bytes: 60_000,
            min_build_iterations: 2,
            max_no_progress: 3,
            max_files_per_iteration: 6,
            num_ctx: 8192,
            num_predict: 2048,
            num_predict_code: 4096,
            fast_mode: false,
            mock_tool_call: false,
            device: "auto".to_string(),
        }
    }
}

/// Configuration for the UI gateway server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Parent directory under which `lch_` projects are created by default
    pub workspaces_root: PathBuf,
    /// Directory holding the static front-end assets
    pub assets_dir: PathBuf,
}

impl GatewayConfig {
    /// Load from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let workspaces_root = match std::env::var("DEFAULT_WORKSPACES_ROOT") {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
            _ => default_workspaces_root(),
        };

        GatewayConfig {
            host: env_string("UI_HOST", "0.0.0.0"),
            port: env_parse("UI_PORT", 8000),
            workspaces_root,
            assets_dir: PathBuf::from(env_string("UI_ASSETS_DIR", "ui")),
        }
    }
}

fn default_workspaces_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Desktop")
        .join("lch_workspaces")
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(std::env::var(key).as_deref(), Ok("1") | Ok("true") | Ok("yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.max_loops, 5);
        assert!(config.num_predict_code > config.num_predict);
        assert!(!config.mock_tool_call);
    }

    #[test]
    fn default_workspaces_root_ends_with_lch_workspaces() {
        let root = default_workspaces_root();
        assert!(root.ends_with("lch_workspaces") || root.to_string_lossy().contains("lch_workspaces"));
    }
}
