/// Event-stream wait strategy
///
/// Opens the engine's status WebSocket *before* submitting, so no frame can
/// be lost to a race, then accumulates `executed` outputs until the
/// completion sentinel (`executing` with a null node for our prompt id).
/// Receives use a short sub-timeout so the wall-clock deadline is honored
/// even on a silent stream. The connection lives for exactly one execution.

use crate::engine::client::EngineClient;
use crate::error::WorkflowError;
use crate::runtime::waiter::{CompletionWaiter, WaitOutcome, Waited};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Streaming waiter
#[derive(Debug)]
pub struct WsWaiter {
    recv_timeout: Duration,
}

impl Default for WsWaiter {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(3),
        }
    }
}

/// What a single frame told us
enum FrameAction {
    /// Nothing relevant; keep listening
    Continue,
    /// Node output collected under this id
    Collected(String, Value),
    /// Completion sentinel for our prompt
    Done,
    /// Engine reported an execution error
    Failed(String),
}

#[async_trait]
impl CompletionWaiter for WsWaiter {
    async fn submit_and_wait(
        &self,
        engine: &EngineClient,
        graph: &Value,
        client_id: &str,
        timeout: Duration,
    ) -> Result<Waited, WorkflowError> {
        let start = Instant::now();

        // Connect first, submit second: frames for our prompt may arrive
        // immediately after submission.
        let mut ws = connect(engine, client_id).await?;
        tracing::info!("🔌 Status stream connected, submitting prompt");

        let prompt_id = match engine.submit(graph, client_id).await {
            Ok(prompt_id) => prompt_id,
            Err(e) => {
                let _ = ws.close(None).await;
                return Err(e);
            }
        };

        let mut collected = serde_json::Map::new();

        loop {
            let elapsed = start.elapsed();
            if elapsed > timeout {
                tracing::warn!("⏰ Stream wait timed out after {:.1}s", elapsed.as_secs_f64());
                let _ = ws.close(None).await;
                return Ok(Waited {
                    prompt_id,
                    outcome: WaitOutcome::Timeout,
                    elapsed: elapsed.as_secs_f64(),
                });
            }

            let frame = match tokio::time::timeout(self.recv_timeout, ws.next()).await {
                // Sub-timeout elapsed; loop back to check the deadline
                Err(_) => continue,
                Ok(None) => {
                    return Ok(self.ended(
                        prompt_id,
                        "status stream closed before completion".into(),
                        start,
                    ));
                }
                Ok(Some(Err(e))) => {
                    return Ok(self.ended(
                        prompt_id,
                        format!("status stream failed: {e}"),
                        start,
                    ));
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let Message::Text(text) = frame else {
                continue;
            };
            let Ok(message) = serde_json::from_str::<Value>(&text) else {
                continue;
            };

            match interpret_frame(&message, &prompt_id) {
                FrameAction::Continue => {}
                FrameAction::Collected(node_id, output) => {
                    tracing::info!("📥 Collected output from node {node_id}");
                    collected.insert(node_id, output);
                }
                FrameAction::Failed(msg) => {
                    let _ = ws.close(None).await;
                    return Ok(self.ended(prompt_id, msg, start));
                }
                FrameAction::Done => {
                    let _ = ws.close(None).await;
                    let elapsed = start.elapsed().as_secs_f64();
                    if collected.is_empty() {
                        tracing::warn!("⚠️ Execution completed but no outputs were streamed");
                        return Ok(Waited {
                            prompt_id,
                            outcome: WaitOutcome::Error {
                                msg: "no outputs were collected from the stream".into(),
                            },
                            elapsed,
                        });
                    }
                    tracing::info!("✅ Stream reported completion with {} nodes", collected.len());
                    return Ok(Waited {
                        prompt_id,
                        outcome: WaitOutcome::Completed { outputs: collected },
                        elapsed,
                    });
                }
            }
        }
    }
}

impl WsWaiter {
    fn ended(&self, prompt_id: String, msg: String, start: Instant) -> Waited {
        tracing::error!("❌ {msg}");
        Waited {
            prompt_id,
            outcome: WaitOutcome::Error { msg },
            elapsed: start.elapsed().as_secs_f64(),
        }
    }
}

/// Open the status stream, attaching configured cookies to the handshake
async fn connect(engine: &EngineClient, client_id: &str) -> Result<WsStream, WorkflowError> {
    let url = engine.ws_url(client_id);
    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| WorkflowError::Engine(format!("invalid stream URL {url}: {e}")))?;

    if let Some(cookie) = engine.cookie_header().await {
        let value = cookie
            .parse()
            .map_err(|_| WorkflowError::Engine("cookie header is not valid ASCII".into()))?;
        request.headers_mut().insert("Cookie", value);
    }

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| WorkflowError::Engine(format!("stream connect failed: {e}")))?;
    Ok(ws)
}

/// Classify one status frame relative to our prompt id
fn interpret_frame(message: &Value, prompt_id: &str) -> FrameAction {
    let msg_type = message.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let data = message.get("data").cloned().unwrap_or(Value::Null);
    let frame_prompt = data.get("prompt_id").and_then(|p| p.as_str());

    if frame_prompt == Some(prompt_id) {
        match msg_type {
            // `executing` with a null node is the completion sentinel
            "executing" if data.get("node").map(Value::is_null).unwrap_or(false) => {
                return FrameAction::Done;
            }
            "executed" => {
                let node_id = data.get("node").and_then(|n| n.as_str());
                let output = data.get("output");
                if let (Some(node_id), Some(output)) = (node_id, output) {
                    let has_media = ["images", "gifs", "audio", "text"]
                        .iter()
                        .any(|key| output.get(key).is_some());
                    if has_media {
                        return FrameAction::Collected(node_id.to_string(), output.clone());
                    }
                }
            }
            "execution_error" => {
                let msg = data
                    .get("exception_message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown engine error")
                    .to_string();
                return FrameAction::Failed(msg);
            }
            "execution_cached" => {
                tracing::debug!("Cached nodes skipped: {:?}", data.get("nodes"));
            }
            _ => {}
        }
    } else if msg_type == "status" {
        // Queue bookkeeping, informational only
        let remaining = data
            .pointer("/status/exec_info/queue_remaining")
            .cloned()
            .unwrap_or(Value::Null);
        tracing::debug!("Queue status update, remaining: {remaining}");
    }

    FrameAction::Continue
}
