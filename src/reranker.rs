//! Tool reranking
//!
//! Second stage of tool selection: the model scores the embedding candidates
//! against the task and the current plan. Unknown names and non-numeric
//! scores are dropped; an unusable response falls back to the embedding
//! ordering so selection never stalls on a bad generation.

use serde_json::{json, Value};

use crate::error::Result;
use crate::llm::{parse_json_lenient, ChatCallOptions, Message, OllamaClient};
use crate::planner::Plan;
use crate::pruner::Candidate;

/// Result of a rerank pass
#[derive(Debug, Clone)]
pub struct Rerank {
    /// Selected tools, best first
    pub selected: Vec<Candidate>,
    /// Report naming the method used (`model_reranker` | `embedding_fallback` | `empty`)
    pub report: Value,
}

/// LLM-backed tool reranker
pub struct ToolReranker {
    client: OllamaClient,
    model: String,
}

impl ToolReranker {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        ToolReranker {
            client,
            model: model.into(),
        }
    }

    /// Rank candidates for the current task and keep the top K
    pub async fn rerank(
        &self,
        task: &str,
        plan: &Plan,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Rerank> {
        if candidates.is_empty() {
            return Ok(Rerank {
                selected: Vec::new(),
                report: json!({"method": "empty", "selected": []}),
            });
        }

        let model_scored = self.model_score(task, plan, candidates).await;
        if !model_scored.is_empty() {
            let mut ranked = model_scored;
            ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            ranked.truncate(top_k.clamp(1, ranked.len()));
            return Ok(Rerank {
                report: selection_report("model_reranker", &ranked),
                selected: ranked,
            });
        }

        let mut ranked: Vec<Candidate> = candidates.to_vec();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k.clamp(1, ranked.len()));
        Ok(Rerank {
            report: selection_report("embedding_fallback", &ranked),
            selected: ranked,
        })
    }

    /// Ask the model for scores; any failure yields an empty list
    async fn model_score(&self, task: &str, plan: &Plan, candidates: &[Candidate]) -> Vec<Candidate> {
        let prompt = build_prompt(task, plan, candidates);
        let response = self
            .client
            .chat(
                &self.model,
                vec![Message::user(prompt)],
                vec![],
                ChatCallOptions::streaming("reranker"),
            )
            .await;

        let content = match response {
            Ok(response) => response.message.content,
            Err(_) => return Vec::new(),
        };
        let Some(parsed) = parse_json_lenient(&content) else {
            return Vec::new();
        };
        apply_rankings(&parsed, candidates)
    }
}

/// Map a `{rankings:[{name, score}]}` object back onto known candidates
fn apply_rankings(parsed: &Value, candidates: &[Candidate]) -> Vec<Candidate> {
    let Some(rankings) = parsed.get("rankings").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut scored = Vec::new();
    for row in rankings {
        let Some(name) = row.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some(score) = row.get("score").and_then(Value::as_f64) else {
            continue;
        };
        let Some(candidate) = candidates.iter().find(|candidate| candidate.name == name) else {
            continue;
        };
        let mut rescored = candidate.clone();
        rescored.score = score;
        scored.push(rescored);
    }
    scored
}

fn selection_report(method: &str, selected: &[Candidate]) -> Value {
    json!({
        "method": method,
        "selected": selected
            .iter()
            .map(|candidate| json!({"name": candidate.name, "score": candidate.score}))
            .collect::<Vec<_>>(),
    })
}

fn build_prompt(task: &str, plan: &Plan, candidates: &[Candidate]) -> String {
    let candidate_lines: Vec<String> = candidates
        .iter()
        .map(|candidate| {
            format!(
                "- {} | base_embedding_score={:.6} | description={}",
                candidate.name, candidate.score, candidate.description
            )
        })
        .collect();
    let plan_text = serde_json::to_string(plan).unwrap_or_default();

    format!(
        "You are a tool reranker for a coding agent.\n\
Given task, plan, and candidate tools, return JSON only with this schema:\n\
{{\"rankings\":[{{\"name\":\"tool_name\",\"score\":0.0}}],\"reason\":\"short\"}}\n\
Rules: higher score means more relevant now, include only candidate names, score range 0..1.\n\n\
Task:\n{task}\n\n\
Plan:\n{plan_text}\n\n\
Candidates:\n{}\n",
        candidate_lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    fn candidate(name: &str, score: f64) -> Candidate {
        Candidate {
            name: name.to_string(),
            description: format!("{name} description"),
            score,
            tool: ToolDefinition::function(name, "d", json!({"type": "object"})),
        }
    }

    #[test]
    fn rankings_drop_unknown_names_and_bad_scores() {
        let candidates = vec![candidate("a", 0.1), candidate("b", 0.2)];
        let parsed = json!({
            "rankings": [
                {"name": "b", "score": 0.9},
                {"name": "ghost", "score": 0.8},
                {"name": "a", "score": "high"},
            ],
            "reason": "short",
        });
        let scored = apply_rankings(&parsed, &candidates);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].name, "b");
        assert!((scored[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn missing_rankings_key_yields_nothing() {
        assert!(apply_rankings(&json!({"reason": "x"}), &[candidate("a", 0.1)]).is_empty());
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let reranker = ToolReranker::new(OllamaClient::mock(), "m");
        let rerank = reranker
            .rerank("task", &Plan::default(), &[], 5)
            .await
            .unwrap();
        assert!(rerank.selected.is_empty());
        assert_eq!(rerank.report["method"], "empty");
    }

    #[tokio::test]
    async fn unusable_model_output_falls_back_to_embedding_order() {
        // The mock transport never returns a rankings object, so the rerank
        // must fall through to the embedding ordering.
        let reranker = ToolReranker::new(OllamaClient::mock(), "m");
        let candidates = vec![candidate("low", 0.1), candidate("high", 0.9)];
        let rerank = reranker
            .rerank("task", &Plan::default(), &candidates, 1)
            .await
            .unwrap();
        assert_eq!(rerank.report["method"], "embedding_fallback");
        assert_eq!(rerank.selected.len(), 1);
        assert_eq!(rerank.selected[0].name, "high");
    }

    #[test]
    fn prompt_lists_candidates_with_base_scores() {
        let prompt = build_prompt("t", &Plan::default(), &[candidate("a", 0.25)]);
        assert!(prompt.contains("- a | base_embedding_score=0.250000"));
        assert!(prompt.contains("\"rankings\""));
    }
}
