//! UI gateway
//!
//! The HTTP front end: project lifecycle endpoints, the NDJSON chat relay
//! around the orchestrator child process, cancellation, static assets, and
//! the workspace file proxy. State is a single locked value; one run at a
//! time.

pub mod events;
pub mod routes;
pub mod state;

pub use events::{events_from_stderr_line, RunState, UiEvent};
pub use routes::router;
pub use state::{GatewayState, PROJECT_PREFIX};
