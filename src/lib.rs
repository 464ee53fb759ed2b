/// comfygate: workflow-to-tool gateway
///
/// Exposes user-authored workflow graphs as callable MCP tools. A graph file
/// dropped into the managed directory is parsed into a typed parameter
/// schema, registered as a tool, and executed on a remote inference engine
/// when invoked, with result media re-hosted onto a blob store.

// Core configuration and error taxonomy
pub mod config;
pub mod error;

// Workflow layer - parsing, lifecycle management, directory tracking
pub mod workflow;

// Dynamic tool registry shared by the MCP surface and the manager
pub mod registry;

// External service clients - inference engine and blob store
pub mod blob;
pub mod engine;

// Execution runtime - parameter application, wait strategies, results
pub mod runtime;

// Protocol surfaces - MCP endpoint and management REST API
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use config::{Config, WaitStrategy};
pub use error::WorkflowError;
pub use runtime::result::{ExecStatus, ExecuteResult};
pub use server::start_server;
pub use workflow::manager::WorkflowManager;
pub use workflow::parser::WorkflowParser;
pub use workflow::types::WorkflowMetadata;
