/// Execution result model
///
/// Every invocation produces one `ExecuteResult`, whatever happened. Media
/// URLs are grouped twice: flat lists for simple consumers and `_by_var` maps
/// keyed by the output variable names declared in the graph. The flat lists
/// are always the concatenation of the `_by_var` values in insertion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal (or in-flight) state of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Processing,
    Completed,
    Error,
    Timeout,
}

/// Structured result of one workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    /// Wall-clock execution time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub images_by_var: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub videos_by_var: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audios: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub audios_by_var: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub texts: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub texts_by_var: IndexMap<String, Vec<String>>,

    /// Raw engine output records keyed by node id, for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    /// Human-readable message, set on error and timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ExecuteResult {
    fn empty(status: ExecStatus) -> Self {
        Self {
            status,
            prompt_id: None,
            duration: None,
            images: Vec::new(),
            images_by_var: IndexMap::new(),
            videos: Vec::new(),
            videos_by_var: IndexMap::new(),
            audios: Vec::new(),
            audios_by_var: IndexMap::new(),
            texts: Vec::new(),
            texts_by_var: IndexMap::new(),
            outputs: None,
            msg: None,
        }
    }

    pub fn completed(prompt_id: impl Into<String>, duration: f64) -> Self {
        let mut result = Self::empty(ExecStatus::Completed);
        result.prompt_id = Some(prompt_id.into());
        result.duration = Some(duration);
        result
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        let mut result = Self::empty(ExecStatus::Error);
        result.msg = Some(msg.into());
        result
    }

    pub fn timed_out(prompt_id: Option<String>, duration: f64) -> Self {
        let mut result = Self::empty(ExecStatus::Timeout);
        result.prompt_id = prompt_id;
        result.duration = Some(duration);
        result.msg = Some(format!("timed out after {duration:.1}s"));
        result
    }

    /// All media URLs currently referenced by this result
    pub fn media_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        urls.extend(self.images.iter().cloned());
        urls.extend(self.videos.iter().cloned());
        urls.extend(self.audios.iter().cloned());
        urls
    }

    /// Rewrite every media URL through the given mapping, leaving unmapped
    /// URLs untouched
    pub fn rewrite_media_urls(&mut self, mapping: &std::collections::HashMap<String, String>) {
        let rewrite = |urls: &mut Vec<String>| {
            for url in urls.iter_mut() {
                if let Some(replacement) = mapping.get(url) {
                    *url = replacement.clone();
                }
            }
        };
        rewrite(&mut self.images);
        rewrite(&mut self.videos);
        rewrite(&mut self.audios);
        for urls in self.images_by_var.values_mut() {
            rewrite(urls);
        }
        for urls in self.videos_by_var.values_mut() {
            rewrite(urls);
        }
        for urls in self.audios_by_var.values_mut() {
            rewrite(urls);
        }
    }

    /// Human-readable projection returned to the calling LLM
    ///
    /// With more than one output variable the per-variable view is shown (one
    /// URL per variable); otherwise the flat list is enough.
    pub fn to_llm_text(&self) -> String {
        if self.status != ExecStatus::Completed {
            let mut out = format!("Generation failed, status: {}", status_name(self.status));
            if let Some(msg) = &self.msg {
                out.push_str(&format!(", message: {msg}"));
            }
            return out;
        }

        let mut out = String::from("Generated successfully");
        append_media(&mut out, "images", &self.images, &self.images_by_var);
        append_media(&mut out, "audios", &self.audios, &self.audios_by_var);
        append_media(&mut out, "videos", &self.videos, &self.videos_by_var);
        append_media(&mut out, "texts", &self.texts, &self.texts_by_var);
        out
    }
}

fn status_name(status: ExecStatus) -> &'static str {
    match status {
        ExecStatus::Processing => "processing",
        ExecStatus::Completed => "completed",
        ExecStatus::Error => "error",
        ExecStatus::Timeout => "timeout",
    }
}

fn append_media(
    out: &mut String,
    label: &str,
    flat: &[String],
    by_var: &IndexMap<String, Vec<String>>,
) {
    if flat.is_empty() {
        return;
    }
    if by_var.len() > 1 {
        let pairs: Vec<String> = by_var
            .iter()
            .map(|(var, urls)| format!("{var}: {}", urls.first().map(String::as_str).unwrap_or("-")))
            .collect();
        out.push_str(&format!(", {label}: {{{}}}", pairs.join(", ")));
    } else {
        out.push_str(&format!(", {label}: [{}]", flat.join(", ")));
    }
}
