/// Failure taxonomy for workflow loading and execution
///
/// Caller mistakes and load-time problems are surfaced as typed errors here.
/// Engine-side outcomes (execution errors, timeouts) travel inside
/// `ExecuteResult` instead, so a tool invocation always produces a structured
/// result at the protocol boundary.

use std::path::PathBuf;

/// Everything that can go wrong between a workflow file and a tool result
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Caller omitted a parameter that the workflow marked as required
    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    /// Tool name contains characters outside `[A-Za-z0-9_.-]`
    #[error("invalid tool name '{0}': only letters, digits, underscores, dots and hyphens are allowed")]
    InvalidToolName(String),

    /// Unload/reload referenced a tool that is not loaded
    #[error("workflow '{0}' is not loaded")]
    NotFound(String),

    /// Workflow file is missing on disk
    #[error("workflow file not found: {0}")]
    FileNotFound(PathBuf),

    /// Malformed graph JSON or a DSL violation (e.g. duplicate MCP node)
    #[error("failed to parse workflow: {0}")]
    Parse(String),

    /// Engine answered with a non-2xx status or an unusable body
    #[error("engine rejected request: {0}")]
    Engine(String),

    /// Network-level failure talking to the engine or blob store
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Blob store upload/download failed
    #[error("blob store failure: {0}")]
    Blob(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// Whether this failure came from the caller's input rather than the system
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            WorkflowError::MissingParam(_) | WorkflowError::InvalidToolName(_)
        )
    }
}
