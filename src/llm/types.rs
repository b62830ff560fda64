//! Type definitions for the Ollama chat/embed transport

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// Tool result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message
    #[serde(default)]
    pub content: String,
    /// Optional name (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
}

impl Message {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            name: None,
            tool_calls: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            name: None,
            tool_calls: None,
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            name: None,
            tool_calls: None,
        }
    }

    /// Create a new tool result message, named after the tool
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.into()),
            tool_calls: None,
        }
    }

    /// Byte length of the content (used for memory budgeting)
    pub fn content_bytes(&self) -> usize {
        self.content.len()
    }
}

/// Tool call as carried inside an assistant message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantToolCall {
    /// Function details
    pub function: FunctionCall,
}

/// Function call details; arguments arrive as a JSON object (or a JSON string
/// that decodes to one)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call
    pub name: String,
    /// Arguments object
    #[serde(default)]
    pub arguments: Value,
}

/// A normalized tool invocation as consumed by the tool host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Tool name
    pub name: String,
    /// Arguments object
    pub arguments: Value,
}

/// Tool definition in the chat API's function-calling format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Wrap a function definition in the wire envelope
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// The tool name
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Function definition for tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// JSON Schema for function parameters
    pub parameters: Value,
}

/// Per-request model options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Context window size in tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    /// Output token budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Request body for `/api/chat`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<ToolDefinition>,
    /// Whether to stream NDJSON chunks
    pub stream: bool,
    /// Model options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
}

/// Response body for `/api/chat` (also the shape of one streamed chunk)
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Model that produced the response
    #[serde(default)]
    pub model: String,
    /// The assistant message (delta in streaming mode)
    pub message: Message,
    /// True on the final chunk / buffered response
    #[serde(default)]
    pub done: bool,
}

/// Request body for `/api/embed`
#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest {
    /// Embedding model
    pub model: String,
    /// Text to embed
    pub input: String,
}

/// Request body for `/api/pull`
#[derive(Debug, Clone, Serialize)]
pub struct PullRequest {
    /// Model to pull
    pub model: String,
    /// Buffered pull
    pub stream: bool,
}

/// One installed model as reported by `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelTag {
    /// Model name, possibly with a `:tag` suffix
    pub name: String,
}

/// Response body for `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct TagsResponse {
    /// Installed models
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

/// Streaming options for a chat call
#[derive(Debug, Clone, Default)]
pub struct ChatCallOptions {
    /// Stream the response and assemble it chunk by chunk
    pub stream: bool,
    /// Stage label for stderr stream sentinels; `None` keeps stderr quiet
    pub stream_label: Option<String>,
    /// Context window override
    pub num_ctx: Option<u32>,
    /// Output token budget override
    pub num_predict: Option<u32>,
}

impl ChatCallOptions {
    /// Buffered call with no streaming sentinels
    pub fn buffered() -> Self {
        ChatCallOptions::default()
    }

    /// Streaming call labeled for the gateway relay
    pub fn streaming(label: impl Into<String>) -> Self {
        ChatCallOptions {
            stream: true,
            stream_label: Some(label.into()),
            ..Default::default()
        }
    }
}
