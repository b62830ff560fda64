//! Tool pruning via embeddings
//!
//! Keeps one persisted embedding vector per catalog tool, keyed by tool name
//! and stamped with the embedding-model identifier. A model change
//! invalidates every vector. Candidate retrieval scores the catalog against
//! the query embedding by cosine similarity and returns the top N.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::llm::{canonical_json, OllamaClient, ToolDefinition};
use crate::trace::EventLog;

/// Persisted vectors file: `{embedding_model, vectors}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorsFile {
    #[serde(default)]
    embedding_model: String,
    #[serde(default)]
    vectors: HashMap<String, Vec<f32>>,
}

/// One scored retrieval candidate
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Cosine similarity against the query (embedding base score)
    pub score: f64,
    /// Full definition, ready to send to the model
    pub tool: ToolDefinition,
}

/// Result of a candidate retrieval
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Top candidates, highest score first
    pub candidates: Vec<Candidate>,
    /// Structured report, also appended to the pruning log
    pub report: Value,
}

/// Embedding-backed tool pruner
pub struct ToolPruner {
    client: OllamaClient,
    embedding_model: String,
    vectors_path: PathBuf,
    log: EventLog,
}

impl ToolPruner {
    pub fn new(
        client: OllamaClient,
        embedding_model: impl Into<String>,
        vectors_path: PathBuf,
        log: EventLog,
    ) -> Self {
        ToolPruner {
            client,
            embedding_model: embedding_model.into(),
            vectors_path,
            log,
        }
    }

    /// Score the catalog against a query and return the top `top_n` tools
    /// (lower-bounded at one when the catalog is non-empty)
    pub async fn retrieve_candidates(
        &self,
        query: &str,
        tools: &[ToolDefinition],
        top_n: usize,
    ) -> Result<Retrieval> {
        let vectors = self.load_or_generate_vectors(tools).await?;
        let query_vector = self.client.embed(&self.embedding_model, query).await?;

        let mut scored: Vec<Candidate> = Vec::new();
        for tool in tools {
            let Some(tool_vector) = vectors.get(tool.name()) else {
                continue;
            };
            scored.push(Candidate {
                name: tool.name().to_string(),
                description: tool.function.description.clone(),
                score: cosine_similarity(&query_vector, tool_vector),
                tool: tool.clone(),
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let limit = top_n.clamp(1, scored.len().max(1));
        scored.truncate(limit);

        let report = json!({
            "embedding_model": self.embedding_model,
            "top_n": top_n,
            "query": query,
            "candidates": scored
                .iter()
                .map(|candidate| json!({"name": candidate.name, "score": candidate.score}))
                .collect::<Vec<_>>(),
            "total_tools": tools.len(),
        });
        self.log.record("retrieval", report.clone());

        Ok(Retrieval {
            candidates: scored,
            report,
        })
    }

    /// Reuse cached vectors where valid, embed the rest, and persist on change
    async fn load_or_generate_vectors(
        &self,
        tools: &[ToolDefinition],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let existing = self.read_vectors_file();
        let mut changed = existing.embedding_model != self.embedding_model;

        let mut result: HashMap<String, Vec<f32>> = HashMap::new();
        for tool in tools {
            let name = tool.name();
            if name.is_empty() {
                continue;
            }
            if !changed {
                if let Some(cached) = existing.vectors.get(name) {
                    result.insert(name.to_string(), cached.clone());
                    continue;
                }
            }
            let vector = self
                .client
                .embed(&self.embedding_model, &tool_to_text(tool))
                .await?;
            result.insert(name.to_string(), vector);
            changed = true;
        }

        if changed {
            self.write_vectors_file(&result)?;
        }
        Ok(result)
    }

    fn read_vectors_file(&self) -> VectorsFile {
        std::fs::read_to_string(&self.vectors_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    /// Whole-file rewrite; the vectors file is only ever replaced wholesale
    fn write_vectors_file(&self, vectors: &HashMap<String, Vec<f32>>) -> Result<()> {
        if let Some(parent) = self.vectors_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = VectorsFile {
            embedding_model: self.embedding_model.clone(),
            vectors: vectors.clone(),
        };
        std::fs::write(&self.vectors_path, serde_json::to_string_pretty(&payload)?)?;
        Ok(())
    }
}

/// Synthesized embedding text for a tool definition
fn tool_to_text(tool: &ToolDefinition) -> String {
    format!(
        "name: {}\ndescription: {}\nparameters: {}",
        tool.function.name,
        tool.function.description,
        canonical_json(&tool.function.parameters),
    )
}

/// Cosine similarity over the shared prefix of two vectors; zero on zero norm
pub fn cosine_similarity(vec_a: &[f32], vec_b: &[f32]) -> f64 {
    let length = vec_a.len().min(vec_b.len());
    if length == 0 {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for idx in 0..length {
        let a = vec_a[idx] as f64;
        let b = vec_b[idx] as f64;
        dot += a * b;
        norm_a += a * a;
        norm_b += b * b;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tool(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition::function(name, description, json!({"type": "object", "properties": {}}))
    }

    fn pruner(dir: &TempDir) -> ToolPruner {
        ToolPruner::new(
            OllamaClient::mock(),
            "nomic-embed-text",
            dir.path().join("embeddings/tool_vectors.json"),
            EventLog::new(dir.path().join("logs/tool_pruning.log")),
        )
    }

    #[test]
    fn cosine_basics() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        let same = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((same - 1.0).abs() < 1e-9);
        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(orthogonal.abs() < 1e-9);
    }

    #[tokio::test]
    async fn retrieval_is_deterministic_and_persisted() {
        let dir = TempDir::new().unwrap();
        let pruner = pruner(&dir);
        let tools = vec![
            tool("create_file", "Write a text file"),
            tool("read_file", "Read a text file"),
            tool("run_unit_tests", "Run JS tests"),
        ];

        let first = pruner.retrieve_candidates("write html", &tools, 2).await.unwrap();
        let second = pruner.retrieve_candidates("write html", &tools, 2).await.unwrap();
        assert_eq!(first.candidates.len(), 2);
        let names =
            |retrieval: &Retrieval| retrieval.candidates.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&first), names(&second));

        let raw =
            std::fs::read_to_string(dir.path().join("embeddings/tool_vectors.json")).unwrap();
        let file: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(file["embedding_model"], "nomic-embed-text");
        assert!(file["vectors"]["create_file"].is_array());

        let log = std::fs::read_to_string(dir.path().join("logs/tool_pruning.log")).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn model_change_invalidates_cached_vectors() {
        let dir = TempDir::new().unwrap();
        let vectors_path = dir.path().join("embeddings/tool_vectors.json");
        std::fs::create_dir_all(vectors_path.parent().unwrap()).unwrap();
        std::fs::write(
            &vectors_path,
            json!({
                "embedding_model": "some-older-model",
                "vectors": {"create_file": [9.0, 9.0, 9.0]},
            })
            .to_string(),
        )
        .unwrap();

        let pruner = pruner(&dir);
        pruner
            .retrieve_candidates("anything", &[tool("create_file", "Write a text file")], 1)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&vectors_path).unwrap();
        let file: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(file["embedding_model"], "nomic-embed-text");
        let vector = file["vectors"]["create_file"].as_array().unwrap();
        assert_eq!(vector.len(), crate::llm::mock::MOCK_EMBEDDING_DIMS);
    }

    #[tokio::test]
    async fn top_n_is_lower_bounded_at_one() {
        let dir = TempDir::new().unwrap();
        let pruner = pruner(&dir);
        let retrieval = pruner
            .retrieve_candidates("q", &[tool("only_tool", "d")], 0)
            .await
            .unwrap();
        assert_eq!(retrieval.candidates.len(), 1);
    }
}
