/// MCP protocol surface
///
/// Implements the tool-protocol server over the dynamic registry: the tool
/// list is whatever is registered right now, and calls dispatch to the
/// executor closures. One static `save_workflow` tool is always present so
/// chat clients can install new workflows by URL.

use crate::blob::BlobClient;
use crate::registry::{tool_definition, ToolHandlerFn, ToolRegistry};
use crate::workflow::manager::WorkflowManager;
use crate::workflow::types::{ParamType, WorkflowParam};
use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, Content, InitializeResult, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities, ToolsCapability,
    },
    service::RequestContext,
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    },
    ErrorData, RoleServer, ServerHandler,
};
use serde_json::Value;
use std::sync::Arc;

const INSTRUCTIONS: &str = "\
Workflow gateway for a remote generative-media engine. Each tool runs one \
workflow; media results come back as stable URLs. Use save_workflow to \
install a new workflow file by URL.";

/// MCP server handler backed by the dynamic tool registry
#[derive(Clone)]
pub struct GatewayServer {
    registry: Arc<ToolRegistry>,
}

impl GatewayServer {
    /// Build the handler and register the builtin tools
    pub fn new(
        registry: Arc<ToolRegistry>,
        manager: Arc<WorkflowManager>,
        blob: Arc<BlobClient>,
    ) -> Self {
        register_save_workflow(&registry, manager, blob);
        Self { registry }
    }

    /// Streamable-HTTP service for nesting into the axum router
    pub fn into_http_service(self) -> StreamableHttpService<GatewayServer> {
        StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        )
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: Default::default(),
            server_info: rmcp::model::Implementation {
                name: "comfygate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(true),
                }),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.registry.list(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(entry) = self.registry.get(&request.name) else {
            return Err(ErrorData::invalid_params(
                format!("unknown tool: {}", request.name),
                None,
            ));
        };

        let args = request.arguments.unwrap_or_default();
        tracing::info!("🛠️ Tool call: {}", entry.tool.name);

        match (entry.handler)(args).await {
            Ok(text) => Ok(CallToolResult {
                content: vec![Content::text(text)],
                structured_content: None,
                is_error: Some(false),
                meta: None,
            }),
            Err(e) => {
                tracing::error!("❌ Tool '{}' failed: {e}", entry.tool.name);
                Ok(CallToolResult {
                    content: vec![Content::text(e.to_string())],
                    structured_content: None,
                    is_error: Some(true),
                    meta: None,
                })
            }
        }
    }
}

/// Install the static `save_workflow` tool
///
/// Downloads a workflow JSON from a URL, writes it into the managed
/// directory and loads it. The tool name comes from the optional `tool_name`
/// argument, else the URL's file stem.
fn register_save_workflow(
    registry: &Arc<ToolRegistry>,
    manager: Arc<WorkflowManager>,
    blob: Arc<BlobClient>,
) {
    let params = [
        WorkflowParam {
            name: "workflow_url".into(),
            param_type: ParamType::String,
            description: Some("URL of the workflow JSON file to install".into()),
            required: true,
            default: None,
        },
        WorkflowParam {
            name: "tool_name".into(),
            param_type: ParamType::String,
            description: Some("Tool name to register under; defaults to the file name".into()),
            required: false,
            default: None,
        },
    ];
    let param_refs: Vec<&WorkflowParam> = params.iter().collect();
    let tool = tool_definition(
        "save_workflow",
        Some("Add or update a workflow as a callable tool."),
        &param_refs,
    );

    let handler: ToolHandlerFn = Arc::new(move |args| {
        let manager = Arc::clone(&manager);
        let blob = Arc::clone(&blob);
        Box::pin(async move { save_workflow(manager, blob, args).await })
    });

    registry.register(tool, handler);
}

async fn save_workflow(
    manager: Arc<WorkflowManager>,
    blob: Arc<BlobClient>,
    args: serde_json::Map<String, Value>,
) -> Result<String, crate::error::WorkflowError> {
    let url = args
        .get("workflow_url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::WorkflowError::MissingParam("workflow_url".into()))?;

    let tool_name = args
        .get("tool_name")
        .and_then(|v| v.as_str())
        .map(|name| name.trim_end_matches(".json").to_string());

    let bytes = blob.download(url).await?;

    let stem = tool_name.clone().or_else(|| {
        crate::blob::filename_from_url(url).map(|f| f.trim_end_matches(".json").to_string())
    });
    let stem = stem.unwrap_or_else(|| format!("workflow_{}", uuid::Uuid::new_v4().simple()));

    let target = manager.workflows_dir().join(format!("{stem}.json"));
    tokio::fs::create_dir_all(manager.workflows_dir()).await?;
    tokio::fs::write(&target, &bytes).await?;

    let metadata = manager.load(&target, tool_name.as_deref()).await?;
    Ok(format!(
        "Workflow '{}' installed with {} parameter(s).",
        metadata.title,
        metadata.params.len()
    ))
}
