//! Core tool trait

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::llm::types::ToolDefinition;

/// A tool that can be called by the agent.
///
/// `execute` returns the *inner* result envelope: a JSON object carrying its
/// own `ok` plus tool-specific fields. Expected failures (missing file,
/// missing marker, bad range) are `Err` values that the host converts into
/// the outer `{ok:false, error:{type, message}}` envelope; they never panic
/// across the tool boundary.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name
    fn name(&self) -> &str;

    /// One-line description shown to the model
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object
    fn input_schema(&self) -> Value;

    /// Execute the tool with validated arguments
    async fn execute(&self, args: Value) -> Result<Value>;

    /// Convert to the chat API's function-calling format
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name(), self.description(), self.input_schema())
    }
}
