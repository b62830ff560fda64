//! Pipeline orchestrator
//!
//! The staged loop controller plus its supporting pieces: stage definitions,
//! tool-call normalization, progress guards, and summary synthesis.

pub mod controller;
pub mod guards;
pub mod normalize;
pub mod stages;
pub mod summary;

pub use controller::{ControllerOptions, LoopController, RunOutcome, RunStatus, ToolTraceEntry};
pub use guards::{Deferral, IterationState};
pub use stages::{Stage, COMPLETION_PREFIX, STOP_PREFIX};
