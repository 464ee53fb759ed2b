/// Workflow management REST API
///
/// Small operational surface next to the MCP endpoint: inspect what is
/// loaded, install a workflow from a URL, unload one, or resync the whole
/// registry with the directory on disk.

use crate::blob::BlobClient;
use crate::error::WorkflowError;
use crate::workflow::manager::WorkflowManager;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared state for the admin handlers
#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<WorkflowManager>,
    pub blob: Arc<BlobClient>,
}

/// Request body for installing a workflow from a URL
#[derive(Debug, Deserialize)]
pub struct InstallWorkflowRequest {
    pub url: String,
    pub tool_name: Option<String>,
}

/// Build the admin routes
pub fn admin_routes() -> Router<AdminState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(install_workflow))
        .route("/api/workflows/reload", post(reload_workflows))
        .route("/api/workflows/{name}", axum::routing::delete(unload_workflow))
}

/// GET /api/workflows: status snapshot of every loaded tool
async fn list_workflows(State(state): State<AdminState>) -> Json<Value> {
    let status = state.manager.status().await;
    Json(json!({
        "total_loaded": status.len(),
        "workflows": status,
    }))
}

/// POST /api/workflows: download a workflow JSON and load it
async fn install_workflow(
    State(state): State<AdminState>,
    Json(payload): Json<InstallWorkflowRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let bytes = state
        .blob
        .download(&payload.url)
        .await
        .map_err(error_response)?;

    let stem = payload
        .tool_name
        .clone()
        .or_else(|| {
            crate::blob::filename_from_url(&payload.url)
                .map(|f| f.trim_end_matches(".json").to_string())
        })
        .unwrap_or_else(|| format!("workflow_{}", uuid::Uuid::new_v4().simple()));

    let target = state.manager.workflows_dir().join(format!("{stem}.json"));
    tokio::fs::write(&target, &bytes)
        .await
        .map_err(|e| error_response(WorkflowError::Io(e)))?;

    let metadata = state
        .manager
        .load(&target, payload.tool_name.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "tool": metadata.title,
        "message": format!("workflow '{}' loaded", metadata.title),
    })))
}

/// POST /api/workflows/reload: resync the registry with the directory
async fn reload_workflows(
    State(state): State<AdminState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let report = state.manager.reload_all().await.map_err(error_response)?;
    Ok(Json(json!(report)))
}

/// DELETE /api/workflows/{name}: unload a tool and delete its file
async fn unload_workflow(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.manager.unload(&name).await.map_err(error_response)?;
    Ok(Json(json!({
        "tool": name,
        "message": format!("workflow '{name}' unloaded"),
    })))
}

/// Map workflow errors onto HTTP status codes
fn error_response(error: WorkflowError) -> (StatusCode, Json<Value>) {
    let status = match &error {
        WorkflowError::NotFound(_) | WorkflowError::FileNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_bad_input() => StatusCode::BAD_REQUEST,
        WorkflowError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() })))
}
