//! Error taxonomy for the KPI agent pipeline.

use thiserror::Error;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Coarse class of an [`AgentError`], used for logging and HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad inbound request; the caller can retry with corrected input.
    Validation,
    /// A required setting is missing or malformed.
    Configuration,
    /// Network failure, non-2xx status, or deadline exceeded.
    UpstreamTransport,
    /// The upstream answered but not in the expected shape.
    SchemaViolation,
}

/// Errors that can occur between the inbound request and the normalized answer.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// Non-success status. `message` is the response body, or `HTTP <status>` when it was empty.
    #[error("{message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream request failed: {0}")]
    Transport(String),

    /// The caller stopped waiting before the upstream answered.
    #[error("Request cancelled before the agent answered")]
    Cancelled,

    #[error("Invalid agent response (schema): {0}")]
    SchemaViolation(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Validation(_) => ErrorKind::Validation,
            AgentError::Configuration(_) => ErrorKind::Configuration,
            AgentError::Timeout { .. }
            | AgentError::UpstreamStatus { .. }
            | AgentError::Transport(_)
            | AgentError::Cancelled => ErrorKind::UpstreamTransport,
            AgentError::SchemaViolation(_) => ErrorKind::SchemaViolation,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }

    /// HTTP status the gateway answers with. Only validation failures are the caller's fault.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            _ => 502,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}
