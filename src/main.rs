/// comfygate: workflow-to-tool gateway
///
/// Main entry point. Reads configuration from COMFYGATE_* environment
/// variables and starts the server:
/// - MCP endpoint (streamable HTTP) at /mcp
/// - Workflow management API at /api/workflows
/// - Health check at /healthz

use comfygate::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Invalid configuration or an unreadable workflow directory must exit
    // non-zero; per-workflow load failures are only logged.
    let config = Config::from_env()?;

    start_server(config).await?;

    Ok(())
}
