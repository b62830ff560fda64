//! Orchestrator CLI
//!
//! The loop-controller child process the UI gateway spawns per run. Events
//! stream on stderr as sentinel lines; exactly one final JSON envelope is
//! printed on stdout. Exit code 0 means the envelope was produced, even for
//! runs that ended on a guard.

use clap::Parser;
use lowcortisol::config::OrchestratorConfig;
use lowcortisol::device::detect_compute_backend;
use lowcortisol::llm::OllamaClient;
use lowcortisol::orchestrator::{ControllerOptions, LoopController};
use lowcortisol::{sandbox, VERSION};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lch-orchestrator",
    version = VERSION,
    about = "Staged plan/code/validate loop for one workspace task",
    long_about = None
)]
struct Cli {
    /// Absolute workspace path
    #[arg(long)]
    workspace_root: String,

    /// User task prompt
    #[arg(long)]
    task: String,

    /// Chat model name
    #[arg(long)]
    model: Option<String>,

    /// Embedding model used for tool pruning and project memory
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Top-K tools to send after pruning
    #[arg(long, default_value_t = 5)]
    top_k_tools: usize,

    /// Top-N embedding candidates before model reranking
    #[arg(long, default_value_t = 8)]
    candidate_pool_size: usize,

    /// Compute backend selection policy
    #[arg(long, default_value = "auto", value_parser = ["auto", "mps", "cuda", "cpu"])]
    device: String,

    /// Maximum loop iterations
    #[arg(long)]
    max_loops: Option<u32>,

    /// Override for the tool-vectors cache file
    #[arg(long)]
    vectors_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    // stderr carries the event sentinel protocol, so diagnostics go to a file
    // inside the workspace log directory once the root is known
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => {}
        Err(error) => {
            println!(
                "{}",
                json!({
                    "ok": false,
                    "error": {"type": "RuntimeError", "message": error.to_string()},
                })
            );
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = sandbox::resolve_workspace_root(&cli.workspace_root)?;

    let log_dir = workspace_root.join(lowcortisol::trace::LOG_DIR_NAME);
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("orchestrator.log"))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("lowcortisol=info".parse()?))
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    let mut config = OrchestratorConfig::from_env();
    if let Some(model) = cli.model {
        config.chat_model = model;
    }
    if let Some(embedding_model) = cli.embedding_model {
        config.embedding_model = embedding_model;
    }
    if let Some(max_loops) = cli.max_loops {
        config.max_loops = max_loops;
    }
    config.device = cli.device.clone();

    let device_info = detect_compute_backend(&config.device);
    std::env::set_var("COMPILOT_DEVICE", &device_info.device);

    let client = OllamaClient::new(&config.base_url)?;
    let health = client.health().await;
    let preload = client
        .ensure_models_loaded(&[config.chat_model.clone(), config.embedding_model.clone()])
        .await?;
    let warmup = client
        .warmup_models(&config.chat_model, &config.embedding_model)
        .await?;

    let options = ControllerOptions {
        top_k_tools: cli.top_k_tools,
        candidate_pool_size: cli.candidate_pool_size,
        vectors_path: cli.vectors_path,
    };
    let mut controller =
        LoopController::new(workspace_root.clone(), client, config.clone(), options)?;
    let result = controller.run(&cli.task).await?;

    println!(
        "{}",
        json!({
            "ok": true,
            "ollama_base_url": config.base_url,
            "ollama_health": health,
            "model_preload": preload,
            "model_warmup": warmup,
            "planner": {"enabled": true, "model": config.chat_model, "fast_mode": config.fast_mode},
            "reranker": {"enabled": true, "model": config.chat_model},
            "tool_pruning": {
                "enabled": true,
                "embedding_model": config.embedding_model,
                "top_k_tools": cli.top_k_tools,
                "candidate_pool_size": cli.candidate_pool_size,
            },
            "compute_backend": device_info,
            "workspace_root": workspace_root.to_string_lossy(),
            "orchestrator_result": result,
        })
    );
    Ok(())
}
