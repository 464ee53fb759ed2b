/// Configuration management for the comfygate gateway
///
/// All options come from `COMFYGATE_*` environment variables so the binary can
/// run unchanged in containers and k8s. The engine URL is the only required
/// setting; everything else has a sensible default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server (MCP endpoint + admin API) configuration
    pub server: ServerConfig,
    /// Remote inference engine configuration
    pub engine: EngineConfig,
    /// How to wait for engine results
    pub wait_strategy: WaitStrategy,
    /// Directory scanned for workflow JSON files at startup
    pub workflows_dir: PathBuf,
    /// Base URL of the blob store used to re-host result media
    pub blob_base_url: String,
    /// Per-invocation deadline in seconds
    pub timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g. "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Remote engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine base URL, e.g. "http://localhost:8188"
    pub base_url: String,
    /// Optional credential injected as `extra_data.api_key_comfy_org` on submit
    pub api_key: Option<String>,
    /// Cookie source: literal JSON mapping, "k=v; k=v" string, or a URL
    /// whose body yields one of those two
    pub cookies: Option<String>,
}

/// Completion-wait strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    /// Poll `GET /history/{prompt_id}` about once a second
    Http,
    /// Stream status frames over `WS /ws?clientId=...`
    Ws,
}

impl Config {
    /// Build configuration from the environment
    ///
    /// Fails when `COMFYGATE_ENGINE_URL` is missing or when a set variable
    /// does not parse; startup errors like these must exit non-zero.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("COMFYGATE_ENGINE_URL")
            .map_err(|_| anyhow::anyhow!("COMFYGATE_ENGINE_URL is required"))?;

        let port = match std::env::var("COMFYGATE_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("COMFYGATE_PORT is not a valid port: {raw}"))?,
            Err(_) => 9002,
        };

        let wait_strategy = match std::env::var("COMFYGATE_WAIT_STRATEGY") {
            Ok(raw) => match raw.as_str() {
                "http" => WaitStrategy::Http,
                "ws" => WaitStrategy::Ws,
                other => anyhow::bail!(
                    "COMFYGATE_WAIT_STRATEGY must be 'http' or 'ws', got '{other}'"
                ),
            },
            Err(_) => WaitStrategy::Http,
        };

        let timeout_secs = match std::env::var("COMFYGATE_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| anyhow::anyhow!("COMFYGATE_TIMEOUT_SECS is not a number: {raw}"))?,
            Err(_) => 30 * 60,
        };

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("COMFYGATE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port,
            },
            engine: EngineConfig {
                base_url,
                api_key: std::env::var("COMFYGATE_ENGINE_API_KEY").ok(),
                cookies: std::env::var("COMFYGATE_ENGINE_COOKIES").ok(),
            },
            wait_strategy,
            workflows_dir: std::env::var("COMFYGATE_WORKFLOWS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/workflows")),
            blob_base_url: std::env::var("COMFYGATE_BLOB_URL")
                .unwrap_or_else(|_| "http://localhost:9001".to_string()),
            timeout_secs,
        })
    }

    /// Per-invocation deadline as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&WaitStrategy::Http).unwrap(),
            "\"http\""
        );
        assert_eq!(serde_json::to_string(&WaitStrategy::Ws).unwrap(), "\"ws\"");
    }
}
