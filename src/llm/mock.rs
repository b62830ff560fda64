//! Deterministic mock transport
//!
//! Replaces the Ollama HTTP API in tests and offline runs. The first chat
//! call returns a fixed tool invocation, every later call returns a
//! completion message. Embeddings are a pure function of the input text so
//! retrieval ordering is reproducible.

use crate::llm::types::{AssistantToolCall, ChatResponse, FunctionCall, Message, Role};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Dimensionality of mock embedding vectors
pub const MOCK_EMBEDDING_DIMS: usize = 32;

/// Shared state of the mock transport
#[derive(Debug, Default)]
pub struct MockState {
    turn: AtomicUsize,
}

impl MockState {
    pub fn new() -> Self {
        MockState::default()
    }

    /// Produce the next scripted chat response
    pub fn chat(&self) -> ChatResponse {
        let turn = self.turn.fetch_add(1, Ordering::SeqCst);
        if turn == 0 {
            return ChatResponse {
                model: "mock".to_string(),
                message: Message {
                    role: Role::Assistant,
                    content: "I will inspect the workspace first.".to_string(),
                    name: None,
                    tool_calls: Some(vec![AssistantToolCall {
                        function: FunctionCall {
                            name: "sandbox_echo_path".to_string(),
                            arguments: json!({"relative_path": "."}),
                        },
                    }]),
                },
                done: true,
            };
        }

        ChatResponse {
            model: "mock".to_string(),
            message: Message::assistant("DONE: tool call executed and response analyzed."),
            done: true,
        }
    }

    /// Seeded embedding: byte sum drives a fixed-length vector
    pub fn embed(text: &str) -> Vec<f32> {
        let seed: u64 = text.bytes().map(u64::from).sum();
        (0..MOCK_EMBEDDING_DIMS)
            .map(|idx| ((seed + idx as u64) % 101) as f32 / 100.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chat_is_a_tool_call_then_completion() {
        let state = MockState::new();
        let first = state.chat();
        let calls = first.message.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "sandbox_echo_path");

        let second = state.chat();
        assert!(second.message.content.starts_with("DONE:"));
        assert!(second.message.tool_calls.is_none());

        let third = state.chat();
        assert!(third.message.content.starts_with("DONE:"));
    }

    #[test]
    fn embeddings_are_deterministic_and_sized() {
        let a = MockState::embed("hello");
        let b = MockState::embed("hello");
        let c = MockState::embed("world");
        assert_eq!(a.len(), MOCK_EMBEDDING_DIMS);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
