/// Output normalization shared by both wait strategies
///
/// The engine reports per-node output records (`images`/`gifs`/`audio` file
/// descriptors plus optional `text`). This module turns them into viewable
/// URLs, classifies them by extension, groups them by output variable and
/// keeps the flat lists equal to the concatenation of the grouped values in
/// insertion order.

use crate::runtime::result::ExecuteResult;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;

const IMAGE_EXTS: [&str; 6] = [".png", ".jpg", ".jpeg", ".webp", ".bmp", ".tiff"];
const VIDEO_EXTS: [&str; 5] = [".mp4", ".mov", ".avi", ".webm", ".gif"];
const AUDIO_EXTS: [&str; 8] = [
    ".mp3", ".wav", ".flac", ".ogg", ".aac", ".m4a", ".wma", ".opus",
];

/// Output record keys the engine uses for file descriptors
const MEDIA_KEYS: [&str; 3] = ["images", "gifs", "audio"];

/// Media URLs grouped by output variable, one map per media class
#[derive(Debug, Default)]
pub struct OutputBuckets {
    pub images_by_var: IndexMap<String, Vec<String>>,
    pub videos_by_var: IndexMap<String, Vec<String>>,
    pub audios_by_var: IndexMap<String, Vec<String>>,
    pub texts_by_var: IndexMap<String, Vec<String>>,
}

impl OutputBuckets {
    /// Move the grouped URLs into a result, deriving the flat lists
    pub fn apply_to(self, result: &mut ExecuteResult) {
        result.images = flatten(&self.images_by_var);
        result.videos = flatten(&self.videos_by_var);
        result.audios = flatten(&self.audios_by_var);
        result.texts = flatten(&self.texts_by_var);
        result.images_by_var = self.images_by_var;
        result.videos_by_var = self.videos_by_var;
        result.audios_by_var = self.audios_by_var;
        result.texts_by_var = self.texts_by_var;
    }

    pub fn is_empty(&self) -> bool {
        self.images_by_var.is_empty()
            && self.videos_by_var.is_empty()
            && self.audios_by_var.is_empty()
            && self.texts_by_var.is_empty()
    }
}

/// Normalize a map of node id → output record into grouped buckets
///
/// Nodes are visited in the map's insertion order (the order outputs were
/// reported), so grouping order is stable. Nodes absent from `output_vars`
/// fall back to their node id as variable name.
pub fn collect_outputs(
    outputs_by_node: &serde_json::Map<String, Value>,
    output_vars: &HashMap<String, String>,
    base_url: &str,
) -> OutputBuckets {
    let mut buckets = OutputBuckets::default();

    for (node_id, node_output) in outputs_by_node {
        let var = output_vars
            .get(node_id)
            .cloned()
            .unwrap_or_else(|| node_id.clone());

        let (images, videos, audios) = split_media_by_suffix(node_output, base_url);
        if !images.is_empty() {
            buckets.images_by_var.entry(var.clone()).or_default().extend(images);
        }
        if !videos.is_empty() {
            buckets.videos_by_var.entry(var.clone()).or_default().extend(videos);
        }
        if !audios.is_empty() {
            buckets.audios_by_var.entry(var.clone()).or_default().extend(audios);
        }

        let texts = collect_texts(node_output);
        if !texts.is_empty() {
            buckets.texts_by_var.entry(var).or_default().extend(texts);
        }
    }

    buckets
}

/// Split one node's file descriptors into image/video/audio view URLs
pub fn split_media_by_suffix(
    node_output: &Value,
    base_url: &str,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut images = Vec::new();
    let mut videos = Vec::new();
    let mut audios = Vec::new();

    for media_key in MEDIA_KEYS {
        let Some(entries) = node_output.get(media_key).and_then(|v| v.as_array()) else {
            continue;
        };
        for entry in entries {
            let Some(filename) = entry.get("filename").and_then(|f| f.as_str()) else {
                continue;
            };
            let subfolder = entry
                .get("subfolder")
                .and_then(|s| s.as_str())
                .unwrap_or_default();
            let media_type = entry
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("output");

            let url = view_url(base_url, filename, subfolder, media_type);

            let lower = filename.to_ascii_lowercase();
            if IMAGE_EXTS.iter().any(|ext| lower.ends_with(ext)) {
                images.push(url);
            } else if VIDEO_EXTS.iter().any(|ext| lower.ends_with(ext)) {
                videos.push(url);
            } else if AUDIO_EXTS.iter().any(|ext| lower.ends_with(ext)) {
                audios.push(url);
            }
        }
    }

    (images, videos, audios)
}

/// Build a `/view` URL against the engine base
pub fn view_url(base_url: &str, filename: &str, subfolder: &str, media_type: &str) -> String {
    let mut url = format!("{base_url}/view?filename={filename}");
    if !subfolder.is_empty() {
        url.push_str(&format!("&subfolder={subfolder}"));
    }
    if !media_type.is_empty() {
        url.push_str(&format!("&type={media_type}"));
    }
    url
}

/// Coerce a node's `text` output into a list of strings
fn collect_texts(node_output: &Value) -> Vec<String> {
    match node_output.get("text") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
        None => Vec::new(),
    }
}

fn flatten(by_var: &IndexMap<String, Vec<String>>) -> Vec<String> {
    by_var.values().flatten().cloned().collect()
}
