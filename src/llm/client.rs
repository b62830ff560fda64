//! Ollama API client
//!
//! Chat, embedding, model listing, pull-if-missing, and warmup against an
//! Ollama-compatible server. Streaming chat assembles the final message from
//! NDJSON chunks and mirrors them to stderr as stream sentinels when a label
//! is supplied, which is how the UI gateway sees live reasoning.

use crate::error::{Error, Result};
use crate::llm::extract;
use crate::llm::mock::MockState;
use crate::llm::types::*;
use crate::trace;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHAT_TIMEOUT: Duration = Duration::from_secs(600);
const EMBED_TIMEOUT: Duration = Duration::from_secs(120);
const TAGS_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_TIMEOUT: Duration = Duration::from_secs(7200);

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    mock: Option<Arc<MockState>>,
}

impl OllamaClient {
    /// Create a client; honors `ORCHESTRATOR_MOCK_TOOLCALL=1` for mock mode
    pub fn new(base_url: &str) -> Result<Self> {
        let mock_enabled =
            matches!(std::env::var("ORCHESTRATOR_MOCK_TOOLCALL").as_deref(), Ok("1"));
        Self::build(base_url, mock_enabled)
    }

    /// Create a client that never touches the network
    pub fn mock() -> Self {
        Self::build("http://localhost:11434", true).expect("mock client construction")
    }

    fn build(base_url: &str, mock_enabled: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()?;
        Ok(OllamaClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mock: mock_enabled.then(|| Arc::new(MockState::new())),
        })
    }

    /// The configured base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe the server and report installed models
    pub async fn health(&self) -> Value {
        if self.mock.is_some() {
            return json!({"ok": true, "mode": "mock", "base_url": self.base_url});
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(TAGS_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match response {
            Ok(response) => match response.json::<TagsResponse>().await {
                Ok(tags) => json!({
                    "ok": true,
                    "mode": "ollama",
                    "models": tags.models.iter().map(|m| m.name.clone()).collect::<Vec<_>>(),
                }),
                Err(error) => health_error(error),
            },
            Err(error) => health_error(error),
        }
    }

    /// Names of installed models
    pub async fn list_model_names(&self) -> Result<Vec<String>> {
        if self.mock.is_some() {
            return Ok(vec![
                "qwen2.5-coder:14b".to_string(),
                "nomic-embed-text".to_string(),
            ]);
        }

        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(TAGS_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "Unable to query models: HTTP {}",
                response.status()
            )));
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Pull any required model that is not installed yet
    pub async fn ensure_models_loaded(&self, required_models: &[String]) -> Result<Value> {
        if self.mock.is_some() {
            return Ok(json!({
                "ok": true,
                "mode": "mock",
                "required_models": required_models,
                "pulled_models": [],
            }));
        }

        let mut installed: Vec<String> = self.list_model_names().await?;
        let mut pulled: Vec<String> = Vec::new();
        for model in required_models {
            if is_model_installed(model, &installed) {
                continue;
            }
            info!("Pulling missing model: {}", model);
            self.pull_model(model).await?;
            pulled.push(model.clone());
            installed = self.list_model_names().await?;
        }

        Ok(json!({
            "ok": true,
            "mode": "ollama",
            "required_models": required_models,
            "pulled_models": pulled,
        }))
    }

    /// Exercise both models once so the first real call is not a cold start
    pub async fn warmup_models(&self, chat_model: &str, embedding_model: &str) -> Result<Value> {
        if self.mock.is_some() {
            return Ok(json!({
                "ok": true,
                "mode": "mock",
                "chat_model": chat_model,
                "embedding_model": embedding_model,
            }));
        }

        let _ = self
            .chat(
                chat_model,
                vec![Message::user("Reply with READY only.")],
                vec![],
                ChatCallOptions::buffered(),
            )
            .await?;
        let _ = self.embed(embedding_model, "tool pruning warmup").await?;

        Ok(json!({
            "ok": true,
            "mode": "ollama",
            "chat_model": chat_model,
            "embedding_model": embedding_model,
        }))
    }

    /// Submit a chat request, streaming or buffered
    pub async fn chat(
        &self,
        model: &str,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: ChatCallOptions,
    ) -> Result<ChatResponse> {
        if let Some(mock) = &self.mock {
            let response = mock.chat();
            if let Some(label) = &options.stream_label {
                trace::emit_stream(label, &response.message.content);
            }
            return Ok(response);
        }

        let request = ChatRequest {
            model: model.to_string(),
            messages,
            tools,
            stream: options.stream,
            options: model_options(&options),
        };
        debug!("Chat request: model={} stream={}", model, options.stream);

        if options.stream {
            self.chat_streaming(request, options.stream_label.as_deref())
                .await
        } else {
            self.chat_buffered(request).await
        }
    }

    async fn chat_buffered(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(CHAT_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("Chat HTTP error {status}: {detail}")));
        }
        Ok(response.json::<ChatResponse>().await?)
    }

    /// Assemble a streamed chat response from NDJSON chunks.
    ///
    /// Each chunk's content delta is appended; tool-call deltas are
    /// concatenated. With a label set, complete lines go out as
    /// `[stream:<label>]` and every delta as a `[stream_raw:<label>]` token.
    async fn chat_streaming(
        &self,
        request: ChatRequest,
        stream_label: Option<&str>,
    ) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(CHAT_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("Chat HTTP error {status}: {detail}")));
        }

        let stream_id = Uuid::new_v4().to_string();
        if let Some(label) = stream_label {
            trace::emit_stream_raw(label, &json!({"token": "start", "stream_id": stream_id}));
        }

        let mut content = String::new();
        let mut tool_calls: Vec<AssistantToolCall> = Vec::new();
        let mut line_buffer = String::new();
        let mut pending = String::new();
        let mut model_name = request.model.clone();

        let mut byte_stream = response.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            pending.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let parsed: ChatResponse = match serde_json::from_str(line) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        warn!("Skipping unparseable chat chunk: {}", error);
                        continue;
                    }
                };
                if !parsed.model.is_empty() {
                    model_name = parsed.model;
                }
                if let Some(calls) = parsed.message.tool_calls {
                    tool_calls.extend(calls);
                }
                let delta = parsed.message.content;
                if delta.is_empty() {
                    continue;
                }
                content.push_str(&delta);
                if let Some(label) = stream_label {
                    trace::emit_stream_raw(
                        label,
                        &json!({"token": "chunk", "stream_id": stream_id, "text": delta}),
                    );
                    line_buffer.push_str(&delta);
                    while let Some(newline) = line_buffer.find('\n') {
                        let line: String = line_buffer.drain(..=newline).collect();
                        trace::emit_stream(label, &line);
                    }
                }
            }
        }

        if let Some(label) = stream_label {
            if !line_buffer.trim().is_empty() {
                trace::emit_stream(label, &line_buffer);
            }
            trace::emit_stream_raw(label, &json!({"token": "end", "stream_id": stream_id}));
        }

        Ok(ChatResponse {
            model: model_name,
            message: Message {
                role: Role::Assistant,
                content,
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            done: true,
        })
    }

    /// Embed one text; malformed responses are transport errors
    pub async fn embed(&self, embedding_model: &str, text: &str) -> Result<Vec<f32>> {
        if self.mock.is_some() {
            return Ok(MockState::embed(text));
        }

        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: embedding_model.to_string(),
            input: text.to_string(),
        };
        let response = self
            .client
            .post(&url)
            .timeout(EMBED_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("Embed HTTP error {status}: {detail}")));
        }

        let parsed: Value = response.json().await?;
        let vector = parsed
            .get("embeddings")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Transport("Invalid embed response: missing embeddings".into()))?;

        let output: Vec<f32> = vector
            .iter()
            .filter_map(Value::as_f64)
            .map(|value| value as f32)
            .collect();
        if output.is_empty() {
            return Err(Error::Transport("Invalid embed response: empty embedding vector".into()));
        }
        Ok(output)
    }

    /// Parse normalized tool calls out of an assistant message
    pub fn extract_tool_calls(&self, message: &Message) -> Vec<ToolCallRequest> {
        extract::extract_tool_calls(message)
    }

    async fn pull_model(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.base_url);
        let request = PullRequest {
            model: model.to_string(),
            stream: false,
        };
        let response = self
            .client
            .post(&url)
            .timeout(PULL_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "Pull HTTP error {status} for model '{model}': {detail}"
            )));
        }
        let parsed: Value = response.json().await?;
        if let Some(error) = parsed.get("error").and_then(Value::as_str) {
            return Err(Error::Transport(format!(
                "Pull failed for model '{model}': {error}"
            )));
        }
        Ok(())
    }
}

fn model_options(options: &ChatCallOptions) -> Option<ModelOptions> {
    if options.num_ctx.is_none() && options.num_predict.is_none() {
        return None;
    }
    Some(ModelOptions {
        num_ctx: options.num_ctx,
        num_predict: options.num_predict,
    })
}

fn is_model_installed(model: &str, installed: &[String]) -> bool {
    if installed.iter().any(|name| name == model) {
        return true;
    }
    if let Some((bare, _tag)) = model.split_once(':') {
        return installed.iter().any(|name| name == bare);
    }
    let tagged = format!("{model}:latest");
    installed.iter().any(|name| name == &tagged)
}

fn health_error(error: reqwest::Error) -> Value {
    json!({
        "ok": false,
        "mode": "ollama",
        "error": {"type": "TransportError", "message": error.to_string()},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn model_installed_matching() {
        let installed = vec!["qwen2.5-coder:14b".to_string(), "nomic-embed-text:latest".to_string()];
        assert!(is_model_installed("qwen2.5-coder:14b", &installed));
        assert!(!is_model_installed("qwen2.5-coder:7b", &installed));
        assert!(!is_model_installed("qwen2.5-coder:latest", &installed));
        assert!(is_model_installed("nomic-embed-text", &installed));
    }

    #[tokio::test]
    async fn mock_chat_and_embed_are_offline() {
        let client = OllamaClient::mock();
        let response = client
            .chat("any", vec![Message::user("hi")], vec![], ChatCallOptions::buffered())
            .await
            .unwrap();
        assert!(response.message.tool_calls.is_some());

        let vector = client.embed("any", "text").await.unwrap();
        assert_eq!(vector.len(), crate::llm::mock::MOCK_EMBEDDING_DIMS);
    }

    #[tokio::test]
    async fn buffered_chat_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "m", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "m",
                "message": {"role": "assistant", "content": "hello back"},
                "done": true,
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri()).unwrap();
        let response = client
            .chat("m", vec![Message::user("hello")], vec![], ChatCallOptions::buffered())
            .await
            .unwrap();
        assert_eq!(response.message.content, "hello back");
        assert!(response.done);
    }

    #[tokio::test]
    async fn streaming_chat_assembles_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"model\":\"m\",\"message\":{\"role\":\"assistant\",\"content\":\"hel\"},\"done\":false}\n",
            "{\"model\":\"m\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"model\":\"m\",\"message\":{\"role\":\"assistant\",\"content\":\"\",\"tool_calls\":[{\"function\":{\"name\":\"read_file\",\"arguments\":{\"relative_path\":\"a\"}}}]},\"done\":true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri()).unwrap();
        let response = client
            .chat(
                "m",
                vec![Message::user("hi")],
                vec![],
                ChatCallOptions {
                    stream: true,
                    stream_label: None,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.message.content, "hello");
        let calls = response.message.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "read_file");
    }

    #[tokio::test]
    async fn embed_round_trip_and_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3]],
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri()).unwrap();
        let vector = client.embed("e", "text").await.unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn embed_rejects_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [],
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri()).unwrap();
        let error = client.embed("e", "text").await.unwrap_err();
        assert!(matches!(error, Error::Transport(_)));
    }

    #[tokio::test]
    async fn chat_http_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(&server.uri()).unwrap();
        let error = client
            .chat("m", vec![Message::user("hi")], vec![], ChatCallOptions::buffered())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Transport(_)));
    }
}
