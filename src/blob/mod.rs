/// Blob store client
///
/// The blob store is treated as `PUT blob → URL` / `GET URL → bytes`. The
/// upload side accepts raw bytes, a local file path or a remote URL and
/// normalizes all three into a named multipart upload. Generated names are a
/// 32-hex uuid plus an extension inferred from the filename, the URL path or
/// the Content-Type header.

use crate::error::WorkflowError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What gets uploaded
#[derive(Debug, Clone)]
pub enum BlobSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Url(String),
}

impl From<Vec<u8>> for BlobSource {
    fn from(bytes: Vec<u8>) -> Self {
        BlobSource::Bytes(bytes)
    }
}

impl From<&Path> for BlobSource {
    fn from(path: &Path) -> Self {
        BlobSource::Path(path.to_path_buf())
    }
}

/// Client for the external blob store
#[derive(Debug)]
pub struct BlobClient {
    base_url: String,
    http: reqwest::Client,
}

impl BlobClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Upload a blob and return its stable URL
    ///
    /// `filename` is preserved when given; otherwise one is generated from
    /// the source (path name, URL path, or uuid + inferred extension).
    pub async fn upload(
        &self,
        source: BlobSource,
        filename: Option<&str>,
    ) -> Result<String, WorkflowError> {
        let (bytes, name) = match source {
            BlobSource::Bytes(bytes) => {
                let name = filename
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| generated_name(".bin"));
                (bytes, name)
            }
            BlobSource::Path(path) => {
                let bytes = tokio::fs::read(&path).await?;
                let name = filename
                    .map(|f| f.to_string())
                    .or_else(|| {
                        path.file_name().map(|n| n.to_string_lossy().into_owned())
                    })
                    .unwrap_or_else(|| generated_name(".bin"));
                (bytes, name)
            }
            BlobSource::Url(url) => {
                let (bytes, content_type) = self.download_raw(&url).await?;
                let name = filename
                    .map(|f| f.to_string())
                    .or_else(|| filename_from_url(&url))
                    .unwrap_or_else(|| {
                        let ext = content_type
                            .as_deref()
                            .and_then(ext_from_content_type)
                            .unwrap_or_else(|| ".bin".to_string());
                        generated_name(&ext)
                    });
                (bytes, name)
            }
        };

        self.upload_bytes(bytes, &name).await
    }

    /// Download any URL into memory
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, WorkflowError> {
        Ok(self.download_raw(url).await?.0)
    }

    async fn download_raw(&self, url: &str) -> Result<(Vec<u8>, Option<String>), WorkflowError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WorkflowError::Blob(format!(
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

    async fn upload_bytes(&self, bytes: Vec<u8>, filename: &str) -> Result<String, WorkflowError> {
        let content_type = content_type_for(filename, &bytes);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(&content_type)
            .map_err(|e| WorkflowError::Blob(format!("invalid content type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::Blob(format!(
                "upload failed: [{status}] {text}"
            )));
        }

        let parsed: Value = response.json().await?;
        let url = parsed
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| WorkflowError::Blob(format!("upload response carried no url: {parsed}")))?;

        tracing::info!("📦 Blob uploaded: {url}");
        Ok(url.to_string())
    }
}

/// uuid-hex name with the given extension (dot included)
fn generated_name(ext: &str) -> String {
    format!("{}{ext}", Uuid::new_v4().simple())
}

/// Extract a usable filename from a URL path
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?.to_string();
    if name.is_empty() || !name.contains('.') {
        return None;
    }
    Some(name)
}

/// Extension for a Content-Type header value, dot included
///
/// A couple of common types get nicer extensions than the registry default.
fn ext_from_content_type(content_type: &str) -> Option<String> {
    let mime_type = content_type.split(';').next()?.trim();
    match mime_type {
        "image/jpeg" => return Some(".jpg".to_string()),
        "image/tiff" => return Some(".tif".to_string()),
        _ => {}
    }
    let exts = mime_guess::get_mime_extensions_str(mime_type)?;
    exts.first().map(|ext| format!(".{ext}"))
}

/// Content-Type for an upload, with a charset parameter for text
///
/// Text types are detected from the filename when possible, otherwise from a
/// byte heuristic: no NUL bytes and at least 70% printable characters in the
/// first KiB.
fn content_type_for(filename: &str, content: &[u8]) -> String {
    let guessed = mime_guess::from_path(filename).first();

    let content_type = match guessed {
        Some(mime) => mime.to_string(),
        None if is_text_content(content) => "text/plain".to_string(),
        None => "application/octet-stream".to_string(),
    };

    if content_type.starts_with("text/") {
        format!("{content_type}; charset=utf-8")
    } else {
        content_type
    }
}

/// Heuristic text detection on the first KiB
fn is_text_content(content: &[u8]) -> bool {
    if content.is_empty() {
        return true;
    }
    let sample = &content[..content.len().min(1024)];
    if sample.contains(&0) {
        return false;
    }
    let printable = sample
        .iter()
        .filter(|&&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7f).contains(&b))
        .count();
    printable as f64 / sample.len() as f64 > 0.7
}
