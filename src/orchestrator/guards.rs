//! Iteration state and progress guards
//!
//! Tracks what the run has produced so far (file generations, validation and
//! test outcomes, deferral counters) and decides when the loop is stuck:
//! either nothing changes for too many iterations, or the model keeps
//! issuing the identical tool-call batch.

use std::collections::{BTreeSet, HashMap, VecDeque};

/// How many identical iteration signatures in a row trigger a stop
pub const REPEATED_SIGNATURE_WINDOW: usize = 3;
/// Consecutive deferrals after which a validation/test call runs anyway
pub const CONSECUTIVE_DEFERRAL_CEILING: u32 = 2;
/// Total deferrals after which a validation/test call runs anyway
pub const TOTAL_DEFERRAL_CEILING: u32 = 6;

/// Outcome of a deferral decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferral {
    /// Execute the call now
    Run,
    /// Skip the call this iteration, with the reason reported in the trace
    Defer(String),
}

/// Mutable per-run state consulted by the loop controller
#[derive(Debug, Default)]
pub struct IterationState {
    /// Current iteration (1-based)
    pub iteration_index: u32,
    /// Active plan phase label
    pub active_phase: String,
    /// True when the workspace had no indexable files at run start
    pub workspace_started_empty: bool,

    /// Writes accepted since the last validation run
    pub changed_files_since_validation: u32,
    /// Writes accepted since the last test run
    pub changed_files_since_tests: u32,
    /// Times validate_web_app actually executed
    pub validation_runs: u32,
    /// Times run_unit_tests actually executed
    pub tests_runs: u32,
    /// Result of the most recent validation run
    pub last_validation_ok: bool,
    /// Whether any test run succeeded
    pub tests_passed: bool,
    /// A test file changed since the last test run
    pub test_file_changed: bool,

    consecutive_validation_deferrals: u32,
    consecutive_test_deferrals: u32,
    total_deferrals: u32,

    /// Iterations in a row with zero accepted file changes
    pub no_progress_count: u32,
    recent_signatures: VecDeque<(String, bool)>,

    /// Write counter per file; increments on each accepted write
    pub file_generation: HashMap<String, u32>,
    /// Generation last shown to the model per file
    file_read_generation: HashMap<String, u32>,
    /// Total accepted writes across the run
    pub substantive_edit_count: u32,
    /// All files changed during the run, sorted
    pub changed_files: BTreeSet<String>,

    /// Last few planner rationales, injected on read-before-write deferrals
    recent_rationales: VecDeque<String>,

    pub html_written: bool,
    pub css_written: bool,
    pub js_written: bool,
    pub test_file_written: bool,
}

impl IterationState {
    pub fn new(workspace_started_empty: bool) -> Self {
        IterationState {
            workspace_started_empty,
            ..Default::default()
        }
    }

    /// Record an accepted write and update all derived flags
    pub fn record_write(&mut self, relative_path: &str) {
        let generation = self.file_generation.entry(relative_path.to_string()).or_insert(0);
        *generation += 1;
        self.substantive_edit_count += 1;
        self.changed_files_since_validation += 1;
        self.changed_files_since_tests += 1;
        self.changed_files.insert(relative_path.to_string());

        let lower = relative_path.to_lowercase();
        if is_test_file(&lower) {
            self.test_file_written = true;
            self.test_file_changed = true;
        } else if lower.ends_with(".html") {
            self.html_written = true;
        } else if lower.ends_with(".css") {
            self.css_written = true;
        } else if lower.ends_with(".js") {
            self.js_written = true;
        }
    }

    /// Record that the model has seen the current content of a file
    pub fn record_read(&mut self, relative_path: &str) {
        let generation = self.file_generation.get(relative_path).copied().unwrap_or(0);
        self.file_read_generation.insert(relative_path.to_string(), generation);
    }

    /// True when the file was written after the model last read it
    pub fn needs_read_before_write(&self, relative_path: &str) -> bool {
        let generation = self.file_generation.get(relative_path).copied().unwrap_or(0);
        let read = self.file_read_generation.get(relative_path).copied().unwrap_or(0);
        generation > read
    }

    /// Decide whether a validate_web_app call runs this iteration
    pub fn validation_decision(&mut self) -> Deferral {
        if self.workspace_started_empty && self.substantive_edit_count == 0 {
            return self.defer_validation("no substantive edits yet");
        }
        let forced = self.consecutive_validation_deferrals >= CONSECUTIVE_DEFERRAL_CEILING
            || self.total_deferrals >= TOTAL_DEFERRAL_CEILING;
        // first run waits for the full HTML+CSS+JS set; later runs are gated
        // on changes since the previous validation
        let ready = if self.validation_runs == 0 {
            self.html_written && self.css_written && self.js_written
        } else {
            self.changed_files_since_validation >= 1
        };
        if ready || forced {
            self.consecutive_validation_deferrals = 0;
            return Deferral::Run;
        }
        self.defer_validation("no changes since last validation and HTML/CSS/JS incomplete")
    }

    /// Decide whether a run_unit_tests call runs this iteration
    pub fn tests_decision(&mut self) -> Deferral {
        if self.workspace_started_empty && self.substantive_edit_count == 0 {
            return self.defer_tests("no substantive edits yet");
        }
        let forced = self.consecutive_test_deferrals >= CONSECUTIVE_DEFERRAL_CEILING
            || self.total_deferrals >= TOTAL_DEFERRAL_CEILING;
        if !forced {
            if self.validation_runs == 0 || !self.last_validation_ok {
                return self.defer_tests("validation has not passed yet");
            }
            if !self.test_file_changed {
                return self.defer_tests("no test file changed since last run");
            }
        }
        self.consecutive_test_deferrals = 0;
        Deferral::Run
    }

    /// Record the outcome of an executed validation
    pub fn record_validation(&mut self, ok: bool) {
        self.validation_runs += 1;
        self.last_validation_ok = ok;
        self.changed_files_since_validation = 0;
    }

    /// Record the outcome of an executed test run
    pub fn record_tests(&mut self, ok: bool) {
        self.tests_runs += 1;
        if ok {
            self.tests_passed = true;
        }
        self.test_file_changed = false;
        self.changed_files_since_tests = 0;
    }

    /// Track progress; returns the updated no-progress streak
    pub fn record_iteration_progress(&mut self, files_changed: bool) -> u32 {
        if files_changed {
            self.no_progress_count = 0;
        } else {
            self.no_progress_count += 1;
        }
        self.no_progress_count
    }

    /// Record this iteration's tool-call signature; true when the last
    /// `REPEATED_SIGNATURE_WINDOW` signatures are identical, non-empty, and
    /// none of those iterations changed a file
    pub fn record_iteration_signature(&mut self, signature: String, files_changed: bool) -> bool {
        self.recent_signatures.push_back((signature.clone(), files_changed));
        while self.recent_signatures.len() > REPEATED_SIGNATURE_WINDOW {
            self.recent_signatures.pop_front();
        }
        if signature.is_empty() || self.recent_signatures.len() < REPEATED_SIGNATURE_WINDOW {
            return false;
        }
        let stuck = self
            .recent_signatures
            .iter()
            .all(|(recorded, changed)| *recorded == signature && !changed);
        if stuck {
            self.recent_signatures.clear();
        }
        stuck
    }

    /// Remember a planner rationale for read-before-write injections
    pub fn push_rationale(&mut self, rationale: &str) {
        if rationale.trim().is_empty() {
            return;
        }
        self.recent_rationales.push_back(rationale.trim().to_string());
        while self.recent_rationales.len() > 3 {
            self.recent_rationales.pop_front();
        }
    }

    /// The retained planner rationales, oldest first
    pub fn recent_rationales(&self) -> Vec<String> {
        self.recent_rationales.iter().cloned().collect()
    }

    /// Everything still missing before a completion signal is accepted
    pub fn completion_gaps(&self, min_build_iterations: u32) -> Vec<String> {
        let mut gaps = Vec::new();
        if self.iteration_index < min_build_iterations {
            gaps.push(format!(
                "minimum build iterations not reached ({}/{})",
                self.iteration_index, min_build_iterations
            ));
        }
        if !self.html_written {
            gaps.push("no HTML file created".to_string());
        }
        if !self.css_written {
            gaps.push("no CSS file created".to_string());
        }
        if !self.js_written {
            gaps.push("no JS file created".to_string());
        }
        if !self.test_file_written {
            gaps.push("no test file created".to_string());
        }
        if !(self.validation_runs > 0 && self.last_validation_ok) {
            gaps.push("no successful validation run".to_string());
        }
        if !self.tests_passed {
            gaps.push("no successful test run".to_string());
        }
        gaps
    }

    fn defer_validation(&mut self, reason: &str) -> Deferral {
        self.consecutive_validation_deferrals += 1;
        self.total_deferrals += 1;
        Deferral::Defer(reason.to_string())
    }

    fn defer_tests(&mut self, reason: &str) -> Deferral {
        self.consecutive_test_deferrals += 1;
        self.total_deferrals += 1;
        Deferral::Defer(reason.to_string())
    }
}

/// File-name check shared with write bookkeeping
pub fn is_test_file(lower_path: &str) -> bool {
    lower_path.ends_with("tests.js")
        || lower_path.ends_with(".test.js")
        || lower_path.ends_with(".spec.js")
}
