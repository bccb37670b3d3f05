use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    error,
    query::SearchOptions,
    search::{self, LoadedEngine, Paths, SearchOutput},
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Clone)]
pub struct KbfuseMcpServer {
    state: Arc<LoadedEngine>,
    tool_router: ToolRouter<Self>,
}

impl KbfuseMcpServer {
    fn new(state: LoadedEngine) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl KbfuseMcpServer {
    /// Hybrid keyword and vector search with rank fusion.
    #[tool(
        name = "kb_search",
        description = "Search the knowledge base. Combines keyword, vector and expanded-query strategies and returns fused, ranked documents."
    )]
    pub async fn kb_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = SearchOptions {
            use_reranker: params.use_reranker.unwrap_or(true),
            timeout_ms: params.timeout_ms,
        };
        let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let report = self
            .state
            .engine
            .search_detailed(&params.query, limit, options)
            .await
            .map_err(|e| mcp_error("search failed", e))?;

        let output = SearchOutput::new(
            &params.query,
            &report,
            params.include_snippet.unwrap_or(true),
        );
        let summary = format_search_summary(&output);
        let structured = serde_json::to_value(&output)
            .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Query analysis and the strategies a search would run.
    #[tool(
        name = "kb_explain",
        description = "Explain how a query would be searched: detected query type, fusion weights, expanded queries and strategies."
    )]
    pub async fn kb_explain(
        &self,
        params: Parameters<ExplainParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let plan = self
            .state
            .engine
            .explain(&params.0.query)
            .map_err(|e| mcp_error("explain failed", e))?;

        let summary = format!(
            "{} query: vector {:.2}, keyword {:.2}; {} strategies",
            plan.characteristics.query_type,
            plan.weights.vector,
            plan.weights.keyword,
            plan.strategies.len()
        );
        let structured = serde_json::to_value(&plan)
            .map_err(|e| mcp_error("failed to serialize query plan", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for KbfuseMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("kbfuse", env!("CARGO_PKG_VERSION")).with_title("kbfuse MCP"),
            )
            .with_instructions(
                "Use kb_search to find documents by keyword, identifier or concept. Use kb_explain to see how a query is interpreted.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Rerank the fused head with the cross-encoder when one is configured (default: true).
    pub use_reranker: Option<bool>,
    /// Overall time budget in milliseconds. Must be positive.
    pub timeout_ms: Option<u64>,
    /// Include a snippet preview (default: true).
    pub include_snippet: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExplainParams {
    /// Query string to analyze.
    pub query: String,
}

fn format_search_summary(output: &SearchOutput) -> String {
    if output.results.is_empty() {
        return format!("No results found for \"{}\"", output.query);
    }

    let mut lines = Vec::with_capacity(output.results.len() + 1);
    let suffix = if output.results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{}\":",
        output.results.len(),
        suffix,
        output.query
    ));

    for item in &output.results {
        lines.push(format!("{} {:.3} {}", item.rank, item.score, item.doc_id));
    }

    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(paths: Paths) -> error::Result<()> {
    let server = KbfuseMcpServer::new(search::load_engine(&paths)?);
    let state = Arc::clone(&server.state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok::<_, error::Error>(())
    })?;

    info!("MCP server stopped");
    state.persist();
    Ok(())
}
