/// Dynamic tool registry
///
/// The bridge between parsed workflow metadata and the tool protocol: each
/// entry pairs a ready-made protocol tool definition with the executor
/// closure that serves it. Reads are lock-free snapshots via ArcSwap so
/// registrations never stall in-flight invocations; the workflow manager
/// serializes all mutations.

use crate::error::WorkflowError;
use crate::workflow::types::WorkflowParam;
use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use rmcp::model::Tool;
use serde_json::{json, Value};
use std::sync::Arc;

/// Future returned by a tool invocation: LLM-readable text or a typed error
pub type ToolFuture = BoxFuture<'static, Result<String, WorkflowError>>;

/// Invocation handler; receives the caller's arguments object
pub type ToolHandlerFn =
    Arc<dyn Fn(serde_json::Map<String, Value>) -> ToolFuture + Send + Sync>;

/// One registered tool: protocol definition plus handler
pub struct RegisteredTool {
    pub tool: Tool,
    pub handler: ToolHandlerFn,
}

/// Ordered, atomically-swappable tool table
///
/// Registration order is preserved; replacing a name keeps its position so
/// clients see a stable tool list across reloads of the same file.
pub struct ToolRegistry {
    tools: ArcSwap<Vec<Arc<RegisteredTool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: ArcSwap::new(Arc::new(Vec::new())),
        }
    }

    /// Register a tool, replacing any existing entry with the same name
    pub fn register(&self, tool: Tool, handler: ToolHandlerFn) {
        let entry = Arc::new(RegisteredTool { tool, handler });
        self.tools.rcu(|current| {
            let mut next = (**current).clone();
            match next.iter().position(|t| t.tool.name == entry.tool.name) {
                Some(index) => next[index] = Arc::clone(&entry),
                None => next.push(Arc::clone(&entry)),
            }
            next
        });
        tracing::info!("🔧 Tool registered: {}", entry.tool.name);
    }

    /// Remove a tool; returns whether it existed
    pub fn unregister(&self, name: &str) -> bool {
        let mut removed = false;
        self.tools.rcu(|current| {
            let mut next = (**current).clone();
            let before = next.len();
            next.retain(|t| t.tool.name != name);
            removed = next.len() != before;
            next
        });
        if removed {
            tracing::info!("🗑️ Tool unregistered: {name}");
        }
        removed
    }

    /// Look up a tool by name (lock-free)
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools
            .load()
            .iter()
            .find(|t| t.tool.name == name)
            .cloned()
    }

    /// Snapshot of all tool definitions in registration order
    pub fn list(&self) -> Vec<Tool> {
        self.tools.load().iter().map(|t| t.tool.clone()).collect()
    }

    /// Currently registered tool names
    pub fn names(&self) -> Vec<String> {
        self.tools
            .load()
            .iter()
            .map(|t| t.tool.name.to_string())
            .collect()
    }
}

/// Build a protocol tool definition from a parameter schema
///
/// Properties are emitted required-first in declared order, and required
/// names are listed in the schema's `required` array.
pub fn tool_definition(
    name: &str,
    description: Option<&str>,
    params: &[&WorkflowParam],
) -> Tool {
    let mut tool = Tool::new(
        name.to_string(),
        description.unwrap_or_default().to_string(),
        Arc::new(input_schema(params)),
    );
    // A missing description should stay absent rather than become ""
    tool.description = description.map(|d| d.to_string().into());
    tool
}

/// JSON Schema object for a parameter list
pub fn input_schema(params: &[&WorkflowParam]) -> serde_json::Map<String, Value> {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut property = serde_json::Map::new();
        property.insert(
            "type".to_string(),
            json!(param.param_type.json_schema_type()),
        );
        if let Some(description) = &param.description {
            property.insert("description".to_string(), json!(description));
        }
        if let Some(default) = &param.default {
            property.insert("default".to_string(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(property));

        if param.required {
            required.push(json!(param.name));
        }
    }

    let mut schema = serde_json::Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}
