//! tablesearch MCP server implementation

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::commands::Context;
use tablesearch::{SearchEngine, SearchError};

/// Upper bound on results per call.
const MAX_LIMIT: i64 = 100;

/// Parameters for search_table tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchTableParams {
    #[schemars(description = "Configured table name (see list_tables)")]
    pub table: String,
    #[schemars(description = "Natural language search query")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 10)")]
    #[serde(default = "default_table_limit")]
    pub limit: i64,
    #[schemars(description = "Only rows from the last N hours (tables with a time filter)")]
    #[serde(default)]
    pub hours: Option<i64>,
    #[schemars(description = "Minimum confidence in [0, 1] (tables with a confidence filter)")]
    #[serde(default)]
    pub min_confidence: Option<f64>,
}

fn default_table_limit() -> i64 {
    10
}

/// Parameters for find_code tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FindCodeParams {
    #[schemars(description = "Natural language description of the code to find")]
    pub query: String,
    #[schemars(description = "Maximum number of results (default: 5)")]
    #[serde(default = "default_code_limit")]
    pub limit: i64,
}

fn default_code_limit() -> i64 {
    5
}

#[derive(Debug, Serialize)]
struct TableInfoJson {
    name: String,
    table: String,
    description: Option<String>,
    columns: Vec<String>,
    default_hours: Option<i64>,
    default_min_confidence: Option<f64>,
}

/// tablesearch MCP Service
#[derive(Clone)]
pub struct TableSearchService {
    ctx: Context,
    tool_router: ToolRouter<Self>,
}

impl TableSearchService {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    /// Run `f` against a freshly opened engine on the blocking pool.
    ///
    /// `Connection` is not `Sync` and the remote provider blocks, so each call
    /// gets its own engine off the async runtime.
    async fn with_engine<T, F>(&self, embed: bool, f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&SearchEngine) -> tablesearch::Result<T> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || {
            let engine = ctx
                .open_engine(embed)
                .map_err(|e| McpError::internal_error(format!("Failed to open engine: {:#}", e), None))?;
            f(&engine).map_err(to_mcp_error)
        })
        .await
        .map_err(|e| McpError::internal_error(format!("Search task failed: {}", e), None))?
    }
}

fn to_mcp_error(e: SearchError) -> McpError {
    match e {
        SearchError::UnknownTable { .. }
        | SearchError::InvalidLimit(_)
        | SearchError::InvalidFilter { .. }
        | SearchError::DimensionMismatch { .. }
        | SearchError::InvalidQueryVector { .. } => McpError::invalid_params(e.to_string(), None),
        other => McpError::internal_error(other.to_string(), None),
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output = serde_json::to_string_pretty(value).map_err(|e| {
        McpError::internal_error(format!("JSON serialization failed: {}", e), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

#[tool_router]
impl TableSearchService {
    #[tool(description = "Semantic search over a configured table. Returns rows with the table's display columns and a similarity score, best first.")]
    async fn search_table(
        &self,
        params: Parameters<SearchTableParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let limit = p.limit.min(MAX_LIMIT);
        let results = self
            .with_engine(true, move |engine| {
                engine.search_text(&p.table, &p.query, limit, p.hours, p.min_confidence)
            })
            .await?;
        json_result(&results)
    }

    #[tool(description = "Semantic search over indexed source code (functions and classes). Returns file, name, type, signature and docstring with a similarity score.")]
    async fn find_code(
        &self,
        params: Parameters<FindCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let limit = p.limit.min(MAX_LIMIT);
        let results = self
            .with_engine(true, move |engine| engine.find_code_text(&p.query, limit))
            .await?;
        json_result(&results)
    }

    #[tool(description = "List configured searchable tables with their columns and filter defaults.")]
    async fn list_tables(&self) -> Result<CallToolResult, McpError> {
        let (_, registry) = self
            .ctx
            .load()
            .map_err(|e| McpError::internal_error(format!("{:#}", e), None))?;

        let tables: Vec<TableInfoJson> = registry
            .iter()
            .map(|t| TableInfoJson {
                name: t.name.clone(),
                table: t.table.to_string(),
                description: t.description.clone(),
                columns: t.output_names().into_iter().map(String::from).collect(),
                default_hours: t.time_filter.as_ref().map(|f| f.default_hours),
                default_min_confidence: t
                    .confidence_filter
                    .as_ref()
                    .map(|f| f.default_min_confidence),
            })
            .collect();
        json_result(&tables)
    }

    #[tool(description = "Code index statistics: element counts by type, files indexed, last index time.")]
    async fn index_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self.with_engine(false, |engine| engine.stats()).await?;
        json_result(&stats)
    }
}

#[tool_handler]
impl ServerHandler for TableSearchService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "tablesearch MCP server. Use list_tables to discover searchable tables, search_table to query one, and find_code to search indexed source code.".to_string()
            ),
            ..Default::default()
        }
    }
}

/// Run the MCP server
pub async fn run_mcp_server(ctx: Context) -> Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("starting MCP server on stdio");
    let service = TableSearchService::new(ctx);
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    Ok(())
}
