/// History-polling wait strategy
///
/// Submits the prompt, then fetches `/history/{prompt_id}` about once a
/// second until the record shows an error status or carries outputs. Missing
/// entries and transport hiccups are retried until the deadline; only the
/// initial submission can fail hard.

use crate::engine::client::EngineClient;
use crate::error::WorkflowError;
use crate::runtime::waiter::{CompletionWaiter, WaitOutcome, Waited};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Poll-based waiter
#[derive(Debug)]
pub struct HttpWaiter {
    poll_interval: Duration,
}

impl Default for HttpWaiter {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl HttpWaiter {
    /// Custom poll cadence, used by tests to keep runs short
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl CompletionWaiter for HttpWaiter {
    async fn submit_and_wait(
        &self,
        engine: &EngineClient,
        graph: &Value,
        client_id: &str,
        timeout: Duration,
    ) -> Result<Waited, WorkflowError> {
        let prompt_id = engine.submit(graph, client_id).await?;
        let start = Instant::now();
        tracing::info!("⏳ Waiting for results over HTTP, prompt_id: {prompt_id}");

        loop {
            if start.elapsed() > timeout {
                tracing::warn!(
                    "⏰ Prompt {prompt_id} timed out after {:.1}s",
                    start.elapsed().as_secs_f64()
                );
                return Ok(Waited {
                    prompt_id,
                    outcome: WaitOutcome::Timeout,
                    elapsed: start.elapsed().as_secs_f64(),
                });
            }

            let record = match engine.history(&prompt_id).await {
                Ok(Some(record)) => record,
                // Not finished yet, or a transient transport failure: retry
                Ok(None) => {
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::debug!("History fetch failed, retrying: {e}");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if let Some(msg) = history_error(&record) {
                return Ok(Waited {
                    prompt_id,
                    outcome: WaitOutcome::Error { msg },
                    elapsed: start.elapsed().as_secs_f64(),
                });
            }

            if let Some(outputs) = record.get("outputs").and_then(|o| o.as_object()) {
                return Ok(Waited {
                    prompt_id,
                    outcome: WaitOutcome::Completed {
                        outputs: outputs.clone(),
                    },
                    elapsed: start.elapsed().as_secs_f64(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Extract an error message from a history record, if it reports one
///
/// The engine signals failure with `status.status_str == "error"` and a
/// `messages` array of `[type, body]` pairs; the `execution_error` bodies
/// carry the useful `exception_message` text.
fn history_error(record: &Value) -> Option<String> {
    let status = record.get("status")?;
    if status.get("status_str").and_then(|s| s.as_str()) != Some("error") {
        return None;
    }

    let mut errors = Vec::new();
    if let Some(messages) = status.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            let Some(pair) = message.as_array() else {
                continue;
            };
            if pair.first().and_then(|t| t.as_str()) == Some("execution_error") {
                if let Some(text) = pair
                    .get(1)
                    .and_then(|b| b.get("exception_message"))
                    .and_then(|m| m.as_str())
                {
                    errors.push(text.to_string());
                }
            }
        }
    }

    if errors.is_empty() {
        Some("unknown engine error".to_string())
    } else {
        Some(errors.join("\n"))
    }
}
