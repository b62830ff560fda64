//! # Low Cortisol
//!
//! A local-first LLM coding agent that grows plain HTML/CSS/JS web apps
//! inside sandboxed workspaces, driven by an Ollama-compatible model.
//!
//! ## Architecture
//!
//! - **Sandbox** (`sandbox`): path containment, size limits, safe subprocesses
//! - **Tool host** (`tools`): schema-validated catalog of file and web-app tools
//! - **Tool pruning** (`pruner`): persisted tool embeddings + cosine retrieval
//! - **Planner / Reranker** (`planner`, `reranker`): per-iteration plan and
//!   LLM-scored tool selection with embedding fallback
//! - **Memory** (`memory`): session transcript with compaction, and the
//!   workspace embedding index
//! - **Orchestrator** (`orchestrator`): the staged plan→code→validate loop
//!   with progress guards and deferral discipline
//! - **Gateway** (`gateway`): axum HTTP surface streaming NDJSON run events
//! - **LLM client** (`llm`): Ollama chat/embed transport with streaming,
//!   tool-call extraction, and a deterministic mock mode

// Error types
pub mod error;

// Environment-driven configuration
pub mod config;

// Compute-backend detection
pub mod device;

// Workspace sandbox
pub mod sandbox;

// Structured run traces (file logs + stderr sentinels)
pub mod trace;

// Ollama transport and output parsing
pub mod llm;

// Tool catalog, registry, and wire host
pub mod tools;

// Tool pruning via embeddings
pub mod pruner;

// Planning phase
pub mod planner;

// Tool reranking
pub mod reranker;

// Session transcript and project memory
pub mod memory;

// The staged pipeline loop
pub mod orchestrator;

// HTTP gateway
pub mod gateway;

// Re-export commonly used items
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
