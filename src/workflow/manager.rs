/// Workflow manager: lifecycle of loaded tools
///
/// Owns the managed workflow directory and keeps the in-memory record map
/// consistent with the external tool registry at every operation boundary.
/// Mutations (load/unload/reload) run under a single mutex; invocations and
/// tool listings read lock-free registry snapshots and are never blocked by
/// a reload.

use crate::error::WorkflowError;
use crate::registry::{tool_definition, ToolHandlerFn, ToolRegistry};
use crate::runtime::executor::WorkflowExecutor;
use crate::workflow::parser::WorkflowParser;
use crate::workflow::types::{LoadedWorkflow, WorkflowMetadata};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of a bulk load (startup scan, reload_all)
#[derive(Debug, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

#[derive(Debug, Serialize)]
pub struct LoadFailure {
    pub file: String,
    pub error: String,
}

/// Status row for one loaded tool
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub tool_name: String,
    pub metadata: WorkflowMetadata,
    pub source_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

/// Manages the workflow directory and the tools derived from it
pub struct WorkflowManager {
    workflows_dir: PathBuf,
    registry: Arc<ToolRegistry>,
    executor: Arc<WorkflowExecutor>,
    parser: WorkflowParser,
    /// Single-writer record map; the mutex also serializes registry mutations
    loaded: Mutex<HashMap<String, LoadedWorkflow>>,
}

impl WorkflowManager {
    pub fn new(
        workflows_dir: PathBuf,
        registry: Arc<ToolRegistry>,
        executor: Arc<WorkflowExecutor>,
    ) -> Self {
        Self {
            workflows_dir,
            registry,
            executor,
            parser: WorkflowParser::new(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn workflows_dir(&self) -> &Path {
        &self.workflows_dir
    }

    /// Scan the managed directory and load every workflow file
    ///
    /// One bad file never blocks the others; failures are collected into the
    /// report and logged.
    pub async fn load_all(&self) -> Result<LoadReport, WorkflowError> {
        std::fs::create_dir_all(&self.workflows_dir)?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.workflows_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        let mut report = LoadReport::default();
        for path in files {
            match self.load(&path, None).await {
                Ok(metadata) => report.loaded.push(metadata.title),
                Err(e) => {
                    tracing::error!("❌ Failed to load {}: {e}", path.display());
                    report.failed.push(LoadFailure {
                        file: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "📥 Workflow scan finished: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Load one workflow file and register it as a tool
    ///
    /// `tool_name` overrides the file stem. Loading a name that already
    /// exists atomically replaces it. When the source file lives outside the
    /// managed directory it is copied in as `{tool_name}.json`.
    pub async fn load(
        &self,
        path: &Path,
        tool_name: Option<&str>,
    ) -> Result<WorkflowMetadata, WorkflowError> {
        let mut loaded = self.loaded.lock().await;
        self.load_locked(&mut loaded, path, tool_name)
    }

    fn load_locked(
        &self,
        loaded: &mut HashMap<String, LoadedWorkflow>,
        path: &Path,
        tool_name: Option<&str>,
    ) -> Result<WorkflowMetadata, WorkflowError> {
        let metadata = self.parser.parse_file(path, tool_name)?;
        let title = metadata.title.clone();

        let source_path = self.save_if_needed(path, &title)?;
        let source_path = source_path
            .canonicalize()
            .unwrap_or_else(|_| source_path.clone());

        let ordered = metadata.ordered_params();
        let tool = tool_definition(&title, metadata.description.as_deref(), &ordered);
        let handler = self.make_handler(source_path.clone());

        // Single critical section: registry replace plus record update
        self.registry.register(tool, handler);
        loaded.insert(
            title.clone(),
            LoadedWorkflow {
                tool_name: title.clone(),
                metadata: metadata.clone(),
                source_path,
                loaded_at: Utc::now(),
            },
        );

        tracing::info!("✅ Workflow loaded as tool: {title}");
        Ok(metadata)
    }

    /// Unload a tool and delete its file from the managed directory
    ///
    /// The file is the source of truth for the tool, so removing the tool
    /// removes the file too.
    pub async fn unload(&self, tool_name: &str) -> Result<(), WorkflowError> {
        self.unload_inner(tool_name, true).await
    }

    /// Unload a tool whose file already disappeared (watcher delete path)
    pub async fn unload_dropped(&self, tool_name: &str) -> Result<(), WorkflowError> {
        self.unload_inner(tool_name, false).await
    }

    async fn unload_inner(&self, tool_name: &str, delete_file: bool) -> Result<(), WorkflowError> {
        let mut loaded = self.loaded.lock().await;
        let Some(record) = loaded.remove(tool_name) else {
            return Err(WorkflowError::NotFound(tool_name.to_string()));
        };

        self.registry.unregister(tool_name);

        if delete_file && record.source_path.exists() {
            if let Err(e) = std::fs::remove_file(&record.source_path) {
                tracing::warn!(
                    "⚠️ Failed to delete {}: {e}",
                    record.source_path.display()
                );
            }
        }

        tracing::info!("🗑️ Workflow unloaded: {tool_name}");
        Ok(())
    }

    /// Drop everything and reload from disk
    ///
    /// Afterwards the registered tool set is exactly what the directory
    /// contains.
    pub async fn reload_all(&self) -> Result<LoadReport, WorkflowError> {
        {
            let mut loaded = self.loaded.lock().await;
            for name in loaded.keys() {
                self.registry.unregister(name);
            }
            loaded.clear();
        }
        self.load_all().await
    }

    /// Snapshot of all loaded workflows
    pub async fn status(&self) -> Vec<WorkflowStatus> {
        let loaded = self.loaded.lock().await;
        let mut rows: Vec<WorkflowStatus> = loaded
            .values()
            .map(|record| WorkflowStatus {
                tool_name: record.tool_name.clone(),
                metadata: record.metadata.clone(),
                source_path: record.source_path.clone(),
                loaded_at: record.loaded_at,
            })
            .collect();
        rows.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        rows
    }

    /// Copy an external workflow file into the managed directory
    ///
    /// Skipped when the source already resolves to the target path, so a
    /// file is never truncated into itself.
    fn save_if_needed(&self, path: &Path, title: &str) -> Result<PathBuf, WorkflowError> {
        let target = self.workflows_dir.join(format!("{title}.json"));

        let same_file = match (path.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same_file {
            return Ok(target);
        }

        if target.exists() {
            // An installed copy wins over the external source
            return Ok(target);
        }

        std::fs::create_dir_all(&self.workflows_dir)?;
        std::fs::copy(path, &target)?;
        tracing::info!("💾 Workflow file saved to {}", target.display());
        Ok(target)
    }

    /// Executor closure for one workflow file
    ///
    /// Captures the absolute graph path; each invocation re-reads the file
    /// and runs the full execution pipeline.
    fn make_handler(&self, path: PathBuf) -> ToolHandlerFn {
        let executor = Arc::clone(&self.executor);
        Arc::new(move |params| {
            let executor = Arc::clone(&executor);
            let path = path.clone();
            Box::pin(async move {
                let result = executor.execute(&path, &params).await?;
                Ok(result.to_llm_text())
            })
        })
    }
}
