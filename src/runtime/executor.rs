/// Workflow executor: the shared execution core
///
/// One `execute` call runs the whole pipeline: re-parse the graph (cheap, and
/// it guarantees schema agreement with what the caller was shown), deep-copy,
/// write mapped parameters, submit and wait via the configured strategy, then
/// re-host produced media onto the blob store so callers get stable URLs.
///
/// Phases are strictly ordered and all I/O is cooperative; concurrent
/// invocations never share mutable state.

use crate::blob::{filename_from_url, BlobClient, BlobSource};
use crate::config::WaitStrategy;
use crate::engine::client::EngineClient;
use crate::error::WorkflowError;
use crate::runtime::http_waiter::HttpWaiter;
use crate::runtime::outputs::collect_outputs;
use crate::runtime::result::ExecuteResult;
use crate::runtime::waiter::{CompletionWaiter, WaitOutcome};
use crate::runtime::ws_waiter::WsWaiter;
use crate::workflow::parser::WorkflowParser;
use crate::workflow::types::{ParamMapping, WorkflowMetadata};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Node class types whose mapped inputs take engine media handles
///
/// When a caller passes an `http(s)://` URL for one of these, the executor
/// downloads it and uploads the bytes to the engine's media endpoint,
/// substituting the assigned handle for the URL.
const MEDIA_UPLOAD_CLASS_TYPES: [&str; 3] = ["LoadImage", "VHS_LoadAudioUpload", "VHS_LoadVideo"];

/// Executes workflows against the remote engine
pub struct WorkflowExecutor {
    engine: Arc<EngineClient>,
    blob: Arc<BlobClient>,
    waiter: Box<dyn CompletionWaiter>,
    parser: WorkflowParser,
    timeout: Duration,
}

impl WorkflowExecutor {
    pub fn new(
        engine: Arc<EngineClient>,
        blob: Arc<BlobClient>,
        strategy: WaitStrategy,
        timeout: Duration,
    ) -> Self {
        let waiter: Box<dyn CompletionWaiter> = match strategy {
            WaitStrategy::Http => Box::new(HttpWaiter::default()),
            WaitStrategy::Ws => Box::new(WsWaiter::default()),
        };
        Self::with_waiter(engine, blob, waiter, timeout)
    }

    /// Construct with an explicit waiter, used by tests
    pub fn with_waiter(
        engine: Arc<EngineClient>,
        blob: Arc<BlobClient>,
        waiter: Box<dyn CompletionWaiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            blob,
            waiter,
            parser: WorkflowParser::new(),
            timeout,
        }
    }

    /// Execute the workflow at `path` with the caller's parameters
    ///
    /// Typed errors cover caller mistakes and load problems; engine-side
    /// outcomes (rejection, execution error, timeout) are reported inside
    /// the returned result.
    pub async fn execute(
        &self,
        path: &Path,
        params: &serde_json::Map<String, Value>,
    ) -> Result<ExecuteResult, WorkflowError> {
        let metadata = self.parser.parse_file(path, None)?;

        let raw = tokio::fs::read_to_string(path).await?;
        let graph: Value = serde_json::from_str(&raw)
            .map_err(|e| WorkflowError::Parse(format!("{}: {e}", path.display())))?;

        // Deep copy via ownership: `graph` was parsed fresh above and is
        // mutated below without touching the file.
        let mut prepared = graph;
        self.apply_params(&mut prepared, &metadata, params).await?;

        let output_vars = metadata.output_vars();
        let client_id = Uuid::new_v4().to_string();

        tracing::info!(
            "🚀 Executing workflow '{}' (client_id: {client_id})",
            metadata.title
        );

        let waited = match self
            .waiter
            .submit_and_wait(&self.engine, &prepared, &client_id, self.timeout)
            .await
        {
            Ok(waited) => waited,
            // Submission failures surface as an error result, not a fault
            Err(e @ (WorkflowError::Engine(_) | WorkflowError::Transport(_))) => {
                tracing::error!("❌ Submission failed: {e}");
                return Ok(ExecuteResult::failed(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let mut result = match waited.outcome {
            WaitOutcome::Completed { outputs } => {
                let mut result = ExecuteResult::completed(waited.prompt_id, waited.elapsed);
                let buckets = collect_outputs(&outputs, &output_vars, self.engine.base_url());
                buckets.apply_to(&mut result);
                result.outputs = Some(Value::Object(outputs));
                result
            }
            WaitOutcome::Error { msg } => {
                let mut result = ExecuteResult::failed(msg);
                result.prompt_id = Some(waited.prompt_id);
                result.duration = Some(waited.elapsed);
                return Ok(result);
            }
            WaitOutcome::Timeout => {
                return Ok(ExecuteResult::timed_out(
                    Some(waited.prompt_id),
                    waited.elapsed,
                ));
            }
        };

        self.rehost_media(&mut result).await;
        tracing::info!(
            "🎉 Workflow '{}' completed in {:.1}s ({} images, {} videos, {} audios, {} texts)",
            metadata.title,
            result.duration.unwrap_or_default(),
            result.images.len(),
            result.videos.len(),
            result.audios.len(),
            result.texts.len()
        );
        Ok(result)
    }

    /// Write every mapped parameter into the graph, in declared order
    ///
    /// Value precedence per parameter: caller-supplied, then schema default;
    /// a required parameter with neither fails the invocation.
    async fn apply_params(
        &self,
        graph: &mut Value,
        metadata: &WorkflowMetadata,
        params: &serde_json::Map<String, Value>,
    ) -> Result<(), WorkflowError> {
        for mapping in &metadata.mapping_info.param_mappings {
            let value = match params.get(&mapping.param_name) {
                Some(value) => value.clone(),
                None => {
                    let Some(info) = metadata.param(&mapping.param_name) else {
                        continue;
                    };
                    match &info.default {
                        Some(default) => default.clone(),
                        None if info.required => {
                            return Err(WorkflowError::MissingParam(mapping.param_name.clone()));
                        }
                        None => continue,
                    }
                }
            };
            self.apply_one(graph, mapping, value).await?;
        }
        Ok(())
    }

    async fn apply_one(
        &self,
        graph: &mut Value,
        mapping: &ParamMapping,
        value: Value,
    ) -> Result<(), WorkflowError> {
        let Some(node) = graph.get_mut(&mapping.node_id) else {
            tracing::warn!("⚠️ Node {} is not in the workflow", mapping.node_id);
            return Ok(());
        };

        let value = if MEDIA_UPLOAD_CLASS_TYPES.contains(&mapping.node_class_type.as_str()) {
            self.resolve_media_value(value).await?
        } else {
            value
        };

        let Some(node_obj) = node.as_object_mut() else {
            return Ok(());
        };
        let inputs = node_obj
            .entry("inputs")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(inputs) = inputs.as_object_mut() {
            inputs.insert(mapping.input_field.clone(), value);
        }
        Ok(())
    }

    /// Turn an `http(s)://` media reference into an engine handle
    ///
    /// Anything else passes through verbatim (already a handle or a plain
    /// media name).
    async fn resolve_media_value(&self, value: Value) -> Result<Value, WorkflowError> {
        let Some(url) = value.as_str() else {
            return Ok(value);
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(value);
        }

        let (bytes, _content_type) = self.engine.download(url).await?;
        let filename =
            filename_from_url(url).unwrap_or_else(|| format!("{}.jpg", Uuid::new_v4().simple()));
        let handle = self.engine.upload_media(&filename, bytes).await?;
        tracing::info!("🖼️ Media uploaded to engine: {handle}");
        Ok(Value::String(handle))
    }

    /// Re-host every engine media URL onto the blob store
    ///
    /// URLs are deduplicated in first-seen order and each unique URL is
    /// transferred exactly once. A failed transfer logs a warning and leaves
    /// the engine URL in place; partial success beats total failure here.
    async fn rehost_media(&self, result: &mut ExecuteResult) {
        let urls = result.media_urls();
        let mut unique: Vec<String> = Vec::new();
        for url in urls {
            if !unique.contains(&url) {
                unique.push(url);
            }
        }
        if unique.is_empty() {
            return;
        }

        let mut cache: HashMap<String, String> = HashMap::new();
        for url in &unique {
            if cache.contains_key(url) {
                continue;
            }
            match self.transfer_one(url).await {
                Ok(new_url) => {
                    cache.insert(url.clone(), new_url);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Re-hosting {url} failed, keeping engine URL: {e}");
                }
            }
        }

        result.rewrite_media_urls(&cache);
    }

    async fn transfer_one(&self, url: &str) -> Result<String, WorkflowError> {
        let (bytes, _content_type) = self.engine.download(url).await?;
        let filename = filename_from_view_url(url);
        self.blob
            .upload(BlobSource::Bytes(bytes), filename.as_deref())
            .await
    }
}

/// Best-effort filename for a `/view?filename=...` URL
///
/// Falls back to the URL path when there is no filename query parameter.
fn filename_from_view_url(url: &str) -> Option<String> {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        for (key, value) in parsed.query_pairs() {
            if key == "filename" && value.contains('.') {
                return Some(value.into_owned());
            }
        }
    }
    filename_from_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn view_url_filenames_come_from_the_query() {
        assert_eq!(
            filename_from_view_url("http://e/view?filename=foo.png&type=output"),
            Some("foo.png".to_string())
        );
        assert_eq!(
            filename_from_view_url("http://e/files/bar.mp4"),
            Some("bar.mp4".to_string())
        );
        assert_eq!(filename_from_view_url("http://e/view?type=output"), None);
    }

    /// apply_params is sync-testable because plain writes never hit the network
    #[tokio::test]
    async fn plain_params_are_written_in_place() {
        let executor = test_executor();
        let parser = WorkflowParser::new();
        let mut graph = json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {"seed": 0},
                "_meta": {"title": "$seed.seed!:random seed"}
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": {"width": 512, "height": 512},
                "_meta": {"title": "$width.width"}
            }
        });
        let metadata = parser.parse(&graph, "t2i").unwrap();

        let params = serde_json::from_value(json!({"seed": 42, "width": 768})).unwrap();
        executor
            .apply_params(&mut graph, &metadata, &params)
            .await
            .unwrap();

        assert_eq!(graph["3"]["inputs"]["seed"], json!(42));
        assert_eq!(graph["5"]["inputs"]["width"], json!(768));
        // Untouched sibling input keeps its value
        assert_eq!(graph["5"]["inputs"]["height"], json!(512));
    }

    #[tokio::test]
    async fn defaults_fill_missing_optional_params() {
        let executor = test_executor();
        let parser = WorkflowParser::new();
        let mut graph = json!({
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": {"width": 512},
                "_meta": {"title": "$width.width"}
            }
        });
        let metadata = parser.parse(&graph, "t2i").unwrap();

        graph["5"]["inputs"]["width"] = json!(0);
        executor
            .apply_params(&mut graph, &metadata, &serde_json::Map::new())
            .await
            .unwrap();
        assert_eq!(graph["5"]["inputs"]["width"], json!(512));
    }

    #[tokio::test]
    async fn missing_required_param_is_bad_input() {
        let executor = test_executor();
        let parser = WorkflowParser::new();
        let mut graph = json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {"seed": 0},
                "_meta": {"title": "$seed.seed!"}
            }
        });
        let metadata = parser.parse(&graph, "t2i").unwrap();

        let err = executor
            .apply_params(&mut graph, &metadata, &serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingParam(name) if name == "seed"));
    }

    fn test_executor() -> WorkflowExecutor {
        let engine = Arc::new(EngineClient::new(&crate::config::EngineConfig {
            base_url: "http://localhost:1".into(),
            api_key: None,
            cookies: None,
        }));
        let blob = Arc::new(BlobClient::new("http://localhost:1"));
        WorkflowExecutor::new(engine, blob, WaitStrategy::Http, Duration::from_secs(1))
    }
}
