//! LLM transport
//!
//! Ollama-compatible chat/embed client, free-form output parsing, and the
//! deterministic mock transport used in tests.

pub mod client;
pub mod extract;
pub mod mock;
pub mod types;

pub use client::OllamaClient;
pub use extract::{call_signature, canonical_json, extract_tool_calls, parse_json_lenient};
pub use types::{
    AssistantToolCall, ChatCallOptions, ChatResponse, FunctionCall, Message, Role,
    ToolCallRequest, ToolDefinition,
};
