//! Pipeline stages
//!
//! The staged pipeline runs `plan` → `code` → `validate`. Each stage carries
//! a fixed allowed-tool set (calls outside it are dropped silently), a set of
//! tools that is always offered to the model, and a stage prompt.

use crate::planner::Plan;

/// The literal prefix by which the agent signals a finished build
pub const COMPLETION_PREFIX: &str = "DONE:";
/// The literal prefix by which the agent gives up
pub const STOP_PREFIX: &str = "GIVE_UP:";

/// One pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Code,
    Validate,
}

impl Stage {
    /// Execution order of the staged pipeline
    pub const SEQUENCE: [Stage; 3] = [Stage::Plan, Stage::Code, Stage::Validate];

    /// Stage name as used in events and logs
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Code => "code",
            Stage::Validate => "validate",
        }
    }

    /// Tools the model may call in this stage; everything else is dropped
    pub fn allowed_tools(&self) -> &'static [&'static str] {
        match self {
            Stage::Plan => &[
                "plan_web_build",
                "list_directory",
                "read_file",
                "sandbox_echo_path",
            ],
            Stage::Code => &[
                "create_file",
                "append_to_file",
                "insert_after_marker",
                "replace_range",
                "read_file",
                "list_directory",
                "scaffold_web_app",
            ],
            Stage::Validate => &[
                "validate_web_app",
                "run_unit_tests",
                "read_file",
                "list_directory",
            ],
        }
    }

    /// Tools always offered to the model in this stage, ahead of the
    /// reranked selection
    pub fn required_tools(&self) -> &'static [&'static str] {
        match self {
            Stage::Plan => &["plan_web_build"],
            Stage::Code => &["create_file"],
            Stage::Validate => &["validate_web_app", "run_unit_tests"],
        }
    }

    /// Whether a tool name passes this stage's allow-list
    pub fn allows(&self, tool_name: &str) -> bool {
        self.allowed_tools().contains(&tool_name)
    }

    /// Build the stage prompt appended to the session transcript
    pub fn build_prompt(&self, task: &str, plan: &Plan, retrieval_context: &str) -> String {
        let header = format!(
            "Stage: {}\nActive phase: {}\nSubgoal: {}\nRationale: {}\n",
            self.name(),
            plan.active_phase,
            plan.subgoal,
            plan.rationale,
        );

        let instructions = match self {
            Stage::Plan => {
                "Produce a comprehensive build plan before any code is written:\n\
- the app's purpose and its MVP feature list (plus stretch features),\n\
- the file structure (index.html, styles.css, app.js, tests.js),\n\
- a per-file content plan,\n\
- the element-ID contract shared between index.html and app.js.\n\
Call plan_web_build exactly once with a one-line summary and the feature list. \
If the workspace already has files, inspect them with list_directory and read_file first."
            }
            Stage::Code => {
                "Implement the planned files now. Call create_file once per planned file \
with the COMPLETE file contents - no placeholders, no fragments, no \"rest stays the same\". \
When modifying an existing file, re-emit its complete new content with overwrite enabled. \
Keep every element ID consistent between index.html and app.js, and keep styles.css in sync \
with the markup."
            }
            Stage::Validate => {
                "Validate the build. Call validate_web_app on the app directory; fix any reported \
issue with a complete-file rewrite, then validate again. Once validation passes and the test \
file is current, call run_unit_tests. When every required file exists, validation passes, and \
tests pass, reply with a line starting with DONE: followed by a short summary."
            }
        };

        format!(
            "{header}\n{instructions}\n\nTask:\n{task}\n\n{retrieval_context}"
        )
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_plan_code_validate() {
        let names: Vec<&str> = Stage::SEQUENCE.iter().map(Stage::name).collect();
        assert_eq!(names, vec!["plan", "code", "validate"]);
    }

    #[test]
    fn allow_lists_scope_write_and_validate_tools() {
        assert!(Stage::Code.allows("create_file"));
        assert!(!Stage::Plan.allows("create_file"));
        assert!(!Stage::Code.allows("validate_web_app"));
        assert!(Stage::Validate.allows("run_unit_tests"));
        assert!(!Stage::Validate.allows("create_file"));
    }

    #[test]
    fn required_tools_are_inside_the_allow_list() {
        for stage in Stage::SEQUENCE {
            for required in stage.required_tools() {
                assert!(stage.allows(required), "{required} not allowed in {stage}");
            }
        }
    }

    #[test]
    fn prompts_carry_stage_and_plan_context() {
        let plan = Plan {
            active_phase: "Phase 4: implement HTML structure".to_string(),
            subgoal: "Write the markup".to_string(),
            ..Default::default()
        };
        let prompt = Stage::Code.build_prompt("build a todo app", &plan, "No retrieved files.");
        assert!(prompt.contains("Stage: code"));
        assert!(prompt.contains("Phase 4"));
        assert!(prompt.contains("COMPLETE file contents"));
        assert!(prompt.contains("build a todo app"));

        let prompt = Stage::Validate.build_prompt("t", &plan, "ctx");
        assert!(prompt.contains("DONE:"));
    }
}
