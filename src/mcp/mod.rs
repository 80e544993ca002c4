//! MCP server for tablesearch
//!
//! Exposes table search, code search and index statistics as MCP tools.

mod server;

pub use server::run_mcp_server;
