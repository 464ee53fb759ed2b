/// Remote inference engine client
///
/// Thin typed wrapper over the engine's wire API: prompt submission, history
/// lookup, media upload, viewable-output URLs and the status WebSocket URL.
/// Configured cookies ride along on every request as a `Cookie` header.

use crate::config::EngineConfig;
use crate::engine::cookies::CookieSource;
use crate::error::WorkflowError;
use serde_json::{json, Value};

/// Client for one engine instance
#[derive(Debug)]
pub struct EngineClient {
    base_url: String,
    api_key: Option<String>,
    cookies: CookieSource,
    http: reqwest::Client,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            cookies: CookieSource::new(config.cookies.clone()),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolved `Cookie` header value, if cookies are configured
    pub async fn cookie_header(&self) -> Option<String> {
        self.cookies.header_value(&self.http).await
    }

    /// Submit a prepared graph, returning the engine-assigned prompt id
    ///
    /// The optional engine credential is injected under
    /// `extra_data.api_key_comfy_org`, matching the engine's expectations.
    pub async fn submit(&self, graph: &Value, client_id: &str) -> Result<String, WorkflowError> {
        let mut body = json!({
            "prompt": graph,
            "client_id": client_id,
        });
        if let Some(api_key) = &self.api_key {
            body["extra_data"] = json!({ "api_key_comfy_org": api_key });
        }

        let mut request = self.http.post(format!("{}/prompt", self.base_url)).json(&body);
        if let Some(cookie) = self.cookie_header().await {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::Engine(format!(
                "submit failed: [{status}] {text}"
            )));
        }

        let parsed: Value = response.json().await?;
        let prompt_id = parsed
            .get("prompt_id")
            .and_then(|p| p.as_str())
            .ok_or_else(|| {
                WorkflowError::Engine(format!("submit response carried no prompt_id: {parsed}"))
            })?;

        tracing::info!("📤 Prompt submitted: {prompt_id}");
        Ok(prompt_id.to_string())
    }

    /// Fetch the history record for a prompt
    ///
    /// Returns `Ok(None)` when the entry does not exist yet or the engine
    /// answered non-200; the poller treats both as "not done, try again".
    pub async fn history(&self, prompt_id: &str) -> Result<Option<Value>, WorkflowError> {
        let mut request = self
            .http
            .get(format!("{}/history/{prompt_id}", self.base_url));
        if let Some(cookie) = self.cookie_header().await {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let parsed: Value = response.json().await?;
        Ok(parsed.get(prompt_id).cloned())
    }

    /// Upload media bytes to the engine, returning its assigned handle
    pub async fn upload_media(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, WorkflowError> {
        let mime = mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(&mime)
            .map_err(|e| WorkflowError::Engine(format!("invalid media mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let mut request = self
            .http
            .post(format!("{}/upload/image", self.base_url))
            .multipart(form);
        if let Some(cookie) = self.cookie_header().await {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::Engine(format!(
                "media upload failed: [{status}] {text}"
            )));
        }

        let parsed: Value = response.json().await?;
        let name = parsed
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return Err(WorkflowError::Engine(format!(
                "media upload response carried no name: {parsed}"
            )));
        }
        Ok(name)
    }

    /// Download a URL with the configured cookies attached
    ///
    /// Returns the body bytes plus the response Content-Type, which callers
    /// use for filename inference.
    pub async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), WorkflowError> {
        let mut request = self.http.get(url);
        if let Some(cookie) = self.cookie_header().await {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkflowError::Engine(format!(
                "download failed: [{status}] {url}"
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = response.bytes().await?.to_vec();
        Ok((bytes, content_type))
    }

    /// WebSocket status-stream URL for a client id
    ///
    /// Derives the scheme from the base URL: `https` becomes `wss`,
    /// everything else `ws`.
    pub fn ws_url(&self, client_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/ws?clientId={client_id}")
    }
}
