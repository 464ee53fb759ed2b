/// Core workflow metadata types
///
/// A workflow graph file is an opaque JSON object mapping node ids to node
/// records. The parser distills it into the structures below: a typed
/// parameter schema plus the mappings that drive write-back and output
/// grouping at execution time. Metadata is immutable for the lifetime of a
/// loaded tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Exposed parameter type, inferred from the default value's JSON type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    String,
}

impl ParamType {
    /// Infer a parameter type from a JSON default value
    ///
    /// Anything that is not an integer, float or boolean is exposed as a
    /// string; that includes arrays and objects, which callers should never
    /// see as defaults anyway.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ParamType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ParamType::Int,
            Value::Number(_) => ParamType::Float,
            _ => ParamType::String,
        }
    }

    /// The JSON Schema type name used in tool registrations
    pub fn json_schema_type(&self) -> &'static str {
        match self {
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::Bool => "boolean",
            ParamType::String => "string",
        }
    }
}

/// One exposed tool parameter, derived from a `$name.field` title marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowParam {
    /// Parameter name visible to tool callers
    pub name: String,
    /// Inferred type
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Free-text description from the marker, if any
    pub description: Option<String>,
    /// Whether the marker carried the `!` required flag
    pub required: bool,
    /// Default value taken from the node's inputs; never present for
    /// required parameters
    pub default: Option<Value>,
}

/// Where a parameter value gets written into the graph at execution time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamMapping {
    pub param_name: String,
    pub node_id: String,
    pub input_field: String,
    /// The node's class type; selects plain vs media-upload write mode
    pub node_class_type: String,
}

/// Which node feeds which named output bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMapping {
    pub node_id: String,
    /// Explicit `$output.<var>` name, or the node id as fallback
    pub output_var: String,
}

/// All mappings derived from a graph, in graph iteration order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingInfo {
    pub param_mappings: Vec<ParamMapping>,
    pub output_mappings: Vec<OutputMapping>,
}

/// Parsed workflow metadata: the complete tool-facing view of a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Tool name (file stem or explicit override)
    pub title: String,
    /// Description from the optional node titled `MCP`
    pub description: Option<String>,
    /// Parameter schema in graph iteration order
    pub params: Vec<WorkflowParam>,
    pub mapping_info: MappingInfo,
}

impl WorkflowMetadata {
    /// Look up a parameter by name
    pub fn param(&self, name: &str) -> Option<&WorkflowParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Parameters in registration order: required first, then optional,
    /// each group keeping its declared order
    pub fn ordered_params(&self) -> Vec<&WorkflowParam> {
        let mut ordered: Vec<&WorkflowParam> =
            self.params.iter().filter(|p| p.required).collect();
        ordered.extend(self.params.iter().filter(|p| !p.required));
        ordered
    }

    /// node_id → output variable map used to group engine outputs
    pub fn output_vars(&self) -> HashMap<String, String> {
        self.mapping_info
            .output_mappings
            .iter()
            .map(|m| (m.node_id.clone(), m.output_var.clone()))
            .collect()
    }
}

/// Process-local record of a loaded tool
#[derive(Debug, Clone, Serialize)]
pub struct LoadedWorkflow {
    pub tool_name: String,
    pub metadata: WorkflowMetadata,
    /// Absolute path of the authoritative workflow file
    pub source_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_inference_follows_json_type() {
        assert_eq!(ParamType::infer(&json!(42)), ParamType::Int);
        assert_eq!(ParamType::infer(&json!(-3)), ParamType::Int);
        assert_eq!(ParamType::infer(&json!(0.5)), ParamType::Float);
        assert_eq!(ParamType::infer(&json!(true)), ParamType::Bool);
        assert_eq!(ParamType::infer(&json!("hi")), ParamType::String);
        assert_eq!(ParamType::infer(&json!([1, 2])), ParamType::String);
    }

    #[test]
    fn ordered_params_put_required_first() {
        let meta = WorkflowMetadata {
            title: "t".into(),
            description: None,
            params: vec![
                WorkflowParam {
                    name: "width".into(),
                    param_type: ParamType::Int,
                    description: None,
                    required: false,
                    default: Some(json!(512)),
                },
                WorkflowParam {
                    name: "seed".into(),
                    param_type: ParamType::Int,
                    description: None,
                    required: true,
                    default: None,
                },
                WorkflowParam {
                    name: "height".into(),
                    param_type: ParamType::Int,
                    description: None,
                    required: false,
                    default: Some(json!(512)),
                },
            ],
            mapping_info: MappingInfo::default(),
        };

        let names: Vec<&str> = meta.ordered_params().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["seed", "width", "height"]);
    }
}
