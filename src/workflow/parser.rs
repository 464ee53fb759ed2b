/// Workflow graph parser
///
/// Turns an annotated graph into `WorkflowMetadata`. All information comes
/// from node titles (`_meta.title`) written in a small DSL:
///
/// - `$<name>.<field>[!][:<description>]` exposes one node input as a tool
///   parameter; `!` marks it required, the description is free text.
/// - `$output.<var>` declares the node's produced media as output `<var>`.
/// - A node titled exactly `MCP` carries the tool description in its
///   `value`/`text`/`string` input.
///
/// Nodes of a known save kind without an explicit output marker become
/// anonymous outputs keyed by their node id.

use crate::error::WorkflowError;
use crate::workflow::types::{
    MappingInfo, OutputMapping, ParamMapping, ParamType, WorkflowMetadata, WorkflowParam,
};
use regex::Regex;
use serde_json::Value;
use std::path::Path;

/// Node class types the engine itself treats as media writers
const KNOWN_WRITER_TYPES: [&str; 5] = [
    "SaveImage",
    "SaveVideo",
    "SaveAudio",
    "VHS_SaveVideo",
    "VHS_SaveAudio",
];

/// Candidate input fields of the `MCP` description node, checked in order
const DESCRIPTION_FIELDS: [&str; 3] = ["value", "text", "string"];

/// Parsed form of a `$name.field` title marker
#[derive(Debug, PartialEq)]
struct DslTitle {
    name: String,
    field: String,
    required: bool,
    description: Option<String>,
}

/// Stateless graph-to-metadata parser
#[derive(Debug)]
pub struct WorkflowParser {
    param_pattern: Regex,
    tool_name_pattern: Regex,
}

impl Default for WorkflowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowParser {
    pub fn new() -> Self {
        Self {
            // $<ident>.<ident>[!][:<description>]
            param_pattern: Regex::new(r"^\$(\w+)\.(\w+)(!)?(?::(.+))?$")
                .expect("param marker pattern is valid"),
            tool_name_pattern: Regex::new(r"^[A-Za-z0-9_.\-]+$")
                .expect("tool name pattern is valid"),
        }
    }

    /// Parse a workflow file into metadata
    ///
    /// The tool name is `tool_name` when given, else the file stem. The name
    /// is validated against `[A-Za-z0-9_.-]+` before any node is inspected.
    pub fn parse_file(
        &self,
        path: &Path,
        tool_name: Option<&str>,
    ) -> Result<WorkflowMetadata, WorkflowError> {
        if !path.exists() {
            return Err(WorkflowError::FileNotFound(path.to_path_buf()));
        }

        let raw = std::fs::read_to_string(path)?;
        let graph: Value = serde_json::from_str(&raw)
            .map_err(|e| WorkflowError::Parse(format!("{}: {e}", path.display())))?;

        let title = match tool_name {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        self.parse(&graph, &title)
    }

    /// Parse an in-memory graph into metadata under the given tool name
    pub fn parse(&self, graph: &Value, title: &str) -> Result<WorkflowMetadata, WorkflowError> {
        if !self.tool_name_pattern.is_match(title) {
            return Err(WorkflowError::InvalidToolName(title.to_string()));
        }

        let nodes = graph
            .as_object()
            .ok_or_else(|| WorkflowError::Parse("graph root must be a JSON object".into()))?;

        let description = self.find_description(nodes)?;

        let mut params: Vec<WorkflowParam> = Vec::new();
        let mut param_mappings = Vec::new();
        let mut output_mappings = Vec::new();

        for (node_id, node_data) in nodes {
            let Some(node) = node_data.as_object() else {
                continue;
            };
            let Some(node_title) = node
                .get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(|t| t.as_str())
            else {
                continue;
            };
            let class_type = node
                .get("class_type")
                .and_then(|c| c.as_str())
                .unwrap_or_default();

            // 1. Explicit output marker wins over everything else
            if let Some(output_var) = parse_output_marker(node_title) {
                output_mappings.push(OutputMapping {
                    node_id: node_id.clone(),
                    output_var: output_var.to_string(),
                });
                continue;
            }

            // 2. Known writer kinds become anonymous outputs keyed by node id
            if KNOWN_WRITER_TYPES.contains(&class_type) {
                output_mappings.push(OutputMapping {
                    node_id: node_id.clone(),
                    output_var: node_id.clone(),
                });
                continue;
            }

            // 3. Parameter marker
            let Some(dsl) = self.parse_dsl_title(node_title) else {
                continue;
            };

            let default_value = extract_field_value(node, &dsl.field);
            let param_type = default_value
                .as_ref()
                .map(ParamType::infer)
                .unwrap_or(ParamType::String);

            if !dsl.required && default_value.is_none() {
                tracing::warn!(
                    "⚠️ Parameter '{}' has no default value but is not marked required",
                    dsl.name
                );
            }

            // A required marker discards any in-graph default
            let default = if dsl.required { None } else { default_value };

            params.push(WorkflowParam {
                name: dsl.name.clone(),
                param_type,
                description: dsl.description,
                required: dsl.required,
                default,
            });
            param_mappings.push(ParamMapping {
                param_name: dsl.name,
                node_id: node_id.clone(),
                input_field: dsl.field,
                node_class_type: class_type.to_string(),
            });
        }

        Ok(WorkflowMetadata {
            title: title.to_string(),
            description,
            params,
            mapping_info: MappingInfo {
                param_mappings,
                output_mappings,
            },
        })
    }

    /// Parse a `$name.field[!][:description]` title, if it is one
    fn parse_dsl_title(&self, title: &str) -> Option<DslTitle> {
        let caps = self.param_pattern.captures(title.trim())?;
        Some(DslTitle {
            name: caps[1].to_string(),
            field: caps[2].to_string(),
            required: caps.get(3).is_some(),
            description: caps
                .get(4)
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    /// Find the optional `MCP` description node; two of them reject the graph
    fn find_description(
        &self,
        nodes: &serde_json::Map<String, Value>,
    ) -> Result<Option<String>, WorkflowError> {
        let mut description = None;
        let mut seen = false;

        for node_data in nodes.values() {
            let title = node_data
                .get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(|t| t.as_str());
            if title != Some("MCP") {
                continue;
            }
            if seen {
                return Err(WorkflowError::Parse(
                    "multiple MCP nodes found; only one is allowed".into(),
                ));
            }
            seen = true;
            description = extract_description(node_data);
        }

        Ok(description)
    }
}

/// Read `inputs[field]` when present and not an edge (`[node_id, slot]`)
fn extract_field_value(node: &serde_json::Map<String, Value>, field: &str) -> Option<Value> {
    let inputs = node.get("inputs")?.as_object()?;
    let value = inputs.get(field)?;
    if value.is_array() {
        return None;
    }
    Some(value.clone())
}

/// Parse `$output.<var>` titles
fn parse_output_marker(title: &str) -> Option<&str> {
    let var = title.strip_prefix("$output.")?;
    if var.is_empty() {
        return None;
    }
    Some(var)
}

/// Pull description text from an `MCP` node's inputs
///
/// The first of `value`/`text`/`string` wins, matched case-insensitively.
fn extract_description(node: &Value) -> Option<String> {
    let inputs = node.get("inputs")?.as_object()?;

    for field in DESCRIPTION_FIELDS {
        for (key, value) in inputs {
            if !key.eq_ignore_ascii_case(field) {
                continue;
            }
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if text.is_empty() {
                return None;
            }
            return Some(text);
        }
    }

    tracing::warn!("⚠️ MCP node has none of the description fields {DESCRIPTION_FIELDS:?}");
    None
}
