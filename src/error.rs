//! Error types for the Low Cortisol agent

use thiserror::Error;

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent, the tool host, and the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool argument failed validation (schema violation, oversize content, bad path syntax)
    #[error("{0}")]
    InvalidArgument(String),

    /// Resolved path landed outside the workspace root
    #[error("{0}")]
    SandboxEscape(String),

    /// Unknown tool name
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// LLM or embedding transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Model output not parseable where structure was required
    #[error("Parse error: {0}")]
    Parse(String),

    /// Subprocess exceeded its timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire-format `error.type` string for the tool host envelope.
    ///
    /// Argument and containment violations surface as `ValueError` so that
    /// clients can match on a stable, transport-independent name.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) | Error::SandboxEscape(_) | Error::ToolNotFound(_) => {
                "ValueError"
            }
            Error::Parse(_) | Error::Json(_) => "InvalidJSON",
            Error::Timeout(_) => "TimeoutExpired",
            Error::Io(_) => "OSError",
            _ => "RuntimeError",
        }
    }

    /// Check if the error should abort the whole run rather than one call
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Http(_) | Error::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_types_match_contract() {
        assert_eq!(
            Error::SandboxEscape("Path escapes workspace sandbox".into()).wire_type(),
            "ValueError"
        );
        assert_eq!(Error::InvalidArgument("bad".into()).wire_type(), "ValueError");
        assert_eq!(Error::ToolNotFound("nope".into()).wire_type(), "ValueError");
        assert_eq!(Error::Timeout("120s".into()).wire_type(), "TimeoutExpired");
        assert_eq!(Error::Parse("not json".into()).wire_type(), "InvalidJSON");
    }

    #[test]
    fn transport_errors_are_run_fatal() {
        assert!(Error::Transport("connection refused".into()).is_run_fatal());
        assert!(!Error::InvalidArgument("bad".into()).is_run_fatal());
    }
}
