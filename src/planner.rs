//! Planning phase
//!
//! One LLM call per iteration produces a structured plan: subgoal, retrieval
//! query, phases, and feature/test suggestions. Output is JSON-only by
//! instruction, but parsing is lenient and every field has a default, so a
//! rambling model degrades the plan instead of failing the iteration. Fast
//! mode skips the model entirely and walks a fixed phase list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::{parse_json_lenient, ChatCallOptions, Message, OllamaClient};

/// Deterministic fast-mode phases, indexed by iteration
const FAST_MODE_PHASES: [&str; 6] = [
    "Plan architecture and milestones",
    "Implement HTML structure and layout",
    "Implement CSS styling and spacing",
    "Implement JavaScript state + CRUD flows",
    "Refine UX interactions and edge cases",
    "Run validation + tests and finalize",
];

/// A structured execution plan for one iteration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// What this iteration should accomplish
    pub subgoal: String,
    /// Query used for tool and file retrieval
    pub retrieval_query: String,
    /// Tool names the planner expects to be useful
    pub tool_hints: Vec<String>,
    /// Why this subgoal now
    pub rationale: String,
    /// Inferred purpose of the app being built
    pub app_purpose: String,
    /// Features worth adding beyond the literal request
    pub suggested_features: Vec<String>,
    /// Look-and-feel direction
    pub visual_direction: String,
    /// How the user interacts with the app
    pub interaction_model: String,
    /// Unit tests the build should end up with
    pub unit_test_plan: Vec<String>,
    /// Concrete implementation phases
    pub development_phases: Vec<String>,
    /// The phase this iteration works on
    pub active_phase: String,
}

/// Planner for generating per-iteration execution plans
pub struct Planner {
    client: OllamaClient,
    model: String,
    fast_mode: bool,
}

impl Planner {
    pub fn new(client: OllamaClient, model: impl Into<String>, fast_mode: bool) -> Self {
        Planner {
            client,
            model: model.into(),
            fast_mode,
        }
    }

    /// Produce the plan for one iteration
    pub async fn plan_step(
        &self,
        task: &str,
        iteration: u32,
        recent_messages: &[Message],
    ) -> Result<Plan> {
        if self.fast_mode {
            let phase_index = (iteration.saturating_sub(1) as usize).min(FAST_MODE_PHASES.len() - 1);
            return Ok(Plan {
                subgoal: FAST_MODE_PHASES[phase_index].to_string(),
                retrieval_query: normalize_retrieval_query(None, task),
                rationale: "Fast mode: using deterministic phase plan".to_string(),
                development_phases: FAST_MODE_PHASES.iter().map(|s| s.to_string()).collect(),
                active_phase: FAST_MODE_PHASES[phase_index].to_string(),
                ..Default::default()
            });
        }

        let prompt = build_prompt(task, iteration, recent_messages);
        let response = self
            .client
            .chat(
                &self.model,
                vec![Message::user(prompt)],
                vec![],
                ChatCallOptions::streaming("planner"),
            )
            .await?;

        let content = response.message.content;
        match parse_json_lenient(&content) {
            Some(parsed) => Ok(plan_from_value(&parsed, task, iteration)),
            None => Ok(fallback_plan(task, iteration)),
        }
    }
}

fn fallback_plan(task: &str, iteration: u32) -> Plan {
    Plan {
        subgoal: format!("Iteration {iteration} execution"),
        retrieval_query: task.to_string(),
        rationale: "Planner fallback due to non-JSON output".to_string(),
        active_phase: format!("Iteration {iteration}"),
        ..Default::default()
    }
}

fn plan_from_value(parsed: &Value, task: &str, iteration: u32) -> Plan {
    Plan {
        subgoal: string_field(parsed, "subgoal", &format!("Iteration {iteration} execution")),
        retrieval_query: normalize_retrieval_query(parsed.get("retrieval_query"), task),
        tool_hints: string_list(parsed, "tool_hints"),
        rationale: string_field(parsed, "rationale", ""),
        app_purpose: string_field(parsed, "app_purpose", ""),
        suggested_features: string_list(parsed, "suggested_features"),
        visual_direction: string_field(parsed, "visual_direction", ""),
        interaction_model: string_field(parsed, "interaction_model", ""),
        unit_test_plan: string_list(parsed, "unit_test_plan"),
        development_phases: string_list(parsed, "development_phases"),
        active_phase: string_field(parsed, "active_phase", &format!("Iteration {iteration}")),
    }
}

fn normalize_retrieval_query(value: Option<&Value>, fallback: &str) -> String {
    if let Some(candidate) = value.and_then(Value::as_str) {
        let candidate = candidate.trim();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    let fallback = fallback.trim();
    if fallback.is_empty() {
        "html css js local concept app".to_string()
    } else {
        fallback.to_string()
    }
}

fn string_field(parsed: &Value, key: &str, default: &str) -> String {
    parsed
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn string_list(parsed: &Value, key: &str) -> Vec<String> {
    parsed
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn build_prompt(task: &str, iteration: u32, recent_messages: &[Message]) -> String {
    let recent_count = recent_messages.len().min(4);
    let recent_lines: Vec<String> = recent_messages[recent_messages.len() - recent_count..]
        .iter()
        .map(|message| {
            let content: String = message.content.chars().take(400).collect();
            format!("- {}: {}", message.role, content)
        })
        .collect();
    let recent_text = if recent_lines.is_empty() {
        "- none".to_string()
    } else {
        recent_lines.join("\n")
    };

    format!(
        "You are a planning module for an HTML/CSS/JS coding agent. \
Think step-by-step and return JSON only. Always include these keys:\n\
subgoal (string), retrieval_query (string), tool_hints (array of strings), rationale (string),\n\
app_purpose (string), suggested_features (array of strings), visual_direction (string),\n\
interaction_model (string), unit_test_plan (array of strings), development_phases (array of strings), active_phase (string).\n\
Rules:\n\
1) infer app purpose,\n\
2) suggest useful features beyond user prompt,\n\
3) define look-and-feel,\n\
4) connect functionality with layout,\n\
5) propose unit tests,\n\
6) split implementation into concrete phases before coding.\n\
Use only plain HTML/CSS/JS local files (no frameworks).\n\n\
Task:\n{task}\n\n\
Iteration: {iteration}\n\
Recent context:\n{recent_text}\n\n\
Return JSON only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fast_mode_walks_the_phase_list() {
        let planner = Planner::new(OllamaClient::mock(), "m", true);
        let first = planner.plan_step("build a todo app", 1, &[]).await.unwrap();
        assert_eq!(first.active_phase, FAST_MODE_PHASES[0]);
        assert_eq!(first.retrieval_query, "build a todo app");
        assert_eq!(first.development_phases.len(), 6);

        let deep = planner.plan_step("build a todo app", 99, &[]).await.unwrap();
        assert_eq!(deep.active_phase, FAST_MODE_PHASES[5]);
    }

    #[test]
    fn plan_from_value_fills_defaults() {
        let parsed = json!({
            "subgoal": "Implement HTML",
            "retrieval_query": "  ",
            "tool_hints": ["create_file", 42],
            "development_phases": ["a", "b"],
        });
        let plan = plan_from_value(&parsed, "the task", 3);
        assert_eq!(plan.subgoal, "Implement HTML");
        assert_eq!(plan.retrieval_query, "the task");
        assert_eq!(plan.tool_hints, vec!["create_file"]);
        assert_eq!(plan.active_phase, "Iteration 3");
    }

    #[test]
    fn retrieval_query_fallback_chain() {
        assert_eq!(normalize_retrieval_query(None, "task text"), "task text");
        assert_eq!(
            normalize_retrieval_query(Some(&json!("query")), "task"),
            "query"
        );
        assert_eq!(
            normalize_retrieval_query(Some(&json!("")), "  "),
            "html css js local concept app"
        );
    }

    #[test]
    fn prompt_includes_recent_context_tail() {
        let messages = vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
            Message::assistant("four"),
            Message::user("five"),
        ];
        let prompt = build_prompt("t", 2, &messages);
        assert!(!prompt.contains("- user: one"));
        assert!(prompt.contains("- assistant: two"));
        assert!(prompt.contains("- user: five"));
        assert!(prompt.contains("Return JSON only."));
    }
}
