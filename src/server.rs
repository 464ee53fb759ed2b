/// Server setup and initialization
///
/// Wires together all components (engine client, blob client, executor,
/// registry, manager, directory watcher) and exposes them through one axum
/// app: `/healthz`, the management API under `/api`, and the MCP endpoint
/// nested at `/mcp`.

use crate::{
    api::{
        admin::{admin_routes, AdminState},
        mcp::GatewayServer,
    },
    blob::BlobClient,
    config::Config,
    engine::client::EngineClient,
    registry::ToolRegistry,
    runtime::executor::WorkflowExecutor,
    workflow::{manager::WorkflowManager, watcher},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Everything the running server needs to keep alive
pub struct App {
    pub router: Router,
    /// Directory watcher; dropping it stops hot-reload
    _watcher: notify::RecommendedWatcher,
}

/// Create the application with all components wired together
pub async fn create_app(config: Config) -> Result<App> {
    tracing::info!("📁 Workflow directory: {}", config.workflows_dir.display());
    std::fs::create_dir_all(&config.workflows_dir)
        .map_err(|e| anyhow::anyhow!("failed to create workflow directory: {e}"))?;

    tracing::info!("🔗 Engine: {}", config.engine.base_url);
    let engine = Arc::new(EngineClient::new(&config.engine));
    let blob = Arc::new(BlobClient::new(&config.blob_base_url));

    tracing::info!(
        "⚙️ Wait strategy: {:?}, timeout: {}s",
        config.wait_strategy,
        config.timeout_secs
    );
    let executor = Arc::new(WorkflowExecutor::new(
        Arc::clone(&engine),
        Arc::clone(&blob),
        config.wait_strategy,
        config.timeout(),
    ));

    let registry = Arc::new(ToolRegistry::new());
    let manager = Arc::new(WorkflowManager::new(
        config.workflows_dir.clone(),
        Arc::clone(&registry),
        executor,
    ));

    // Initial scan: per-file failures are logged, never fatal
    let report = manager.load_all().await?;
    for failure in &report.failed {
        tracing::error!("❌ Skipped {}: {}", failure.file, failure.error);
    }

    let _watcher = watcher::spawn(Arc::clone(&manager))?;

    let gateway = GatewayServer::new(
        Arc::clone(&registry),
        Arc::clone(&manager),
        Arc::clone(&blob),
    );

    let admin_state = AdminState {
        manager,
        blob,
    };

    tracing::info!("📡 Building HTTP router");
    let router = Router::new()
        .route("/healthz", get(health_check))
        .merge(admin_routes().with_state(admin_state))
        .nest_service("/mcp", gateway.into_http_service());

    tracing::info!("✅ Application initialized ({} tools)", registry.names().len());

    Ok(App { router, _watcher })
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Starting comfygate server...");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_app(config).await?;

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{bind_addr} (MCP at /mcp)");

    axum::serve(listener, app.router.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
