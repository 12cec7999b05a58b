use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Workflow error types
#[derive(Debug, Error, Clone)]
pub enum WorkflowError {
    /// Structural problem in the workflow document. Aborts the run
    /// before any handler executes.
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// A required upstream or ambient input value is absent.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Failure reported by a node handler, carrying its own sub-kind
    /// (for example `auth`, `rate_limit`, `upstream_http`, `parse`).
    #[error("handler error ({kind}): {message}")]
    Handler {
        kind: String,
        message: String,
        retriable: bool,
    },

    /// Per-node deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Run cancellation observed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Node skipped because all predecessors failed or were skipped.
    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Execution error inside the engine itself
    #[error("execution error: {0}")]
    Execution(String),

    /// Invalid state error
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(String),
}

impl WorkflowError {
    /// Short machine-readable kind tag, used in run reports.
    pub fn kind(&self) -> &str {
        match self {
            Self::InvalidWorkflow(_) => "invalid_workflow",
            Self::MissingInput(_) => "missing_input",
            Self::Handler { .. } => "handler_error",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::UpstreamFailed(_) => "upstream_failed",
            Self::Config(_) => "config",
            Self::Execution(_) => "execution",
            Self::InvalidState(_) => "invalid_state",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Determines if the error is retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) => true,
            Self::Handler { retriable, .. } => *retriable,
            _ => false,
        }
    }

    /// Convenience constructor for non-retriable handler failures.
    pub fn handler(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            kind: kind.into(),
            message: message.into(),
            retriable: false,
        }
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

/// Serializable error form carried in run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&WorkflowError> for ErrorInfo {
    fn from(err: &WorkflowError) -> Self {
        let kind = match err {
            WorkflowError::Handler { kind, .. } => format!("handler_error:{}", kind),
            other => other.kind().to_string(),
        };
        ErrorInfo {
            kind,
            message: err.to_string(),
        }
    }
}
