/// Completion-wait capability
///
/// A waiter owns the submit-then-wait portion of an execution: it submits the
/// prepared graph at the moment its strategy requires (the streaming waiter
/// connects first to avoid missing frames) and reports back the per-node
/// output records, an engine error, or a timeout. Normalization of the
/// records happens in the executor, identically for both strategies.

use crate::engine::client::EngineClient;
use crate::error::WorkflowError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Terminal state of a wait
#[derive(Debug)]
pub enum WaitOutcome {
    /// Engine finished; output records keyed by node id
    Completed {
        outputs: serde_json::Map<String, Value>,
    },
    /// Engine reported an execution failure
    Error { msg: String },
    /// The deadline expired before completion
    Timeout,
}

/// What a completed (or abandoned) wait looks like
#[derive(Debug)]
pub struct Waited {
    pub prompt_id: String,
    pub outcome: WaitOutcome,
    /// Seconds spent between submission and the terminal state
    pub elapsed: f64,
}

/// One of the two interchangeable completion strategies
#[async_trait]
pub trait CompletionWaiter: Send + Sync {
    /// Submit `graph` under `client_id` and wait for a terminal state
    ///
    /// Errors are reserved for submission failures (engine rejection,
    /// transport); once a prompt id exists, every path produces `Waited`.
    async fn submit_and_wait(
        &self,
        engine: &EngineClient,
        graph: &Value,
        client_id: &str,
        timeout: Duration,
    ) -> Result<Waited, WorkflowError>;
}
