/// Protocol surfaces - MCP endpoint and management REST API

pub mod admin;
pub mod mcp;
