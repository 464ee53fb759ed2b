/// Workflow directory hot-reload
///
/// Watches the managed directory and keeps the tool registry in sync with
/// the files on disk: a JSON file appearing or changing loads it, a file
/// disappearing unloads its tool. Changes to the same path within one second
/// are coalesced, because editors and copies fire bursts of events.

use crate::workflow::manager::WorkflowManager;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const DEBOUNCE: Duration = Duration::from_secs(1);

/// Start watching the manager's directory
///
/// The returned watcher must stay alive for events to keep flowing; the
/// server holds it for the process lifetime.
pub fn spawn(manager: Arc<WorkflowManager>) -> anyhow::Result<RecommendedWatcher> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => tracing::warn!("⚠️ Watcher error: {e}"),
        }
    })?;
    watcher.watch(manager.workflows_dir(), RecursiveMode::NonRecursive)?;

    tracing::info!(
        "👀 Watching workflow directory: {}",
        manager.workflows_dir().display()
    );

    tokio::spawn(handle_events(manager, rx));
    Ok(watcher)
}

async fn handle_events(manager: Arc<WorkflowManager>, mut rx: mpsc::UnboundedReceiver<Event>) {
    let mut last_handled: HashMap<PathBuf, Instant> = HashMap::new();

    while let Some(event) = rx.recv().await {
        for path in event.paths {
            if !is_workflow_file(&path) {
                continue;
            }

            if path.exists() {
                // Created or modified: (re)load, debounced per path
                let now = Instant::now();
                if let Some(last) = last_handled.get(&path) {
                    if now.duration_since(*last) < DEBOUNCE {
                        continue;
                    }
                }
                last_handled.insert(path.clone(), now);

                tracing::info!("📄 Workflow file changed: {}", path.display());
                if let Err(e) = manager.load(&path, None).await {
                    tracing::error!("❌ Hot-reload of {} failed: {e}", path.display());
                }
            } else {
                // Deleted or renamed away: drop the tool, file is gone already
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                last_handled.remove(&path);
                tracing::info!("📄 Workflow file removed: {}", path.display());
                match manager.unload_dropped(stem).await {
                    Ok(()) => {}
                    Err(crate::error::WorkflowError::NotFound(_)) => {}
                    Err(e) => tracing::error!("❌ Unload of '{stem}' failed: {e}"),
                }
            }
        }
    }
}

fn is_workflow_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
