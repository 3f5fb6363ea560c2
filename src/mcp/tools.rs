//! MCP tool handlers.
//!
//! The registry is fixed at compile time by `#[tool_router]`:
//! 1. index_docs    – embed and append a batch of documents
//! 2. retrieve_docs – nearest-neighbour lookup for a query
//!
//! Arguments are deserialized into the parameter structs below before a
//! handler runs, so type errors and missing fields never reach the index.
use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{
    ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::db::models::SearchResult;
use crate::service::{DEFAULT_TOP_K, RagError, RetrievalService};

/// Returned by `retrieve_docs` when nothing is stored yet.
pub const NO_RESULTS: &str = "no results";

/// `data.kind` values attached to tool errors.
pub mod error_kind {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const EMBEDDING_PROVIDER: &str = "embedding_provider";
    pub const DIMENSION_MISMATCH: &str = "dimension_mismatch";
    pub const INTERNAL: &str = "internal";
}

// ── Parameter structs ────────────────────────────────────────────────

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IndexDocsParams {
    /// Documents to index, one text per entry
    pub docs: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RetrieveDocsParams {
    /// Search query (natural language)
    pub query: String,
    /// Number of documents to return (default: 3)
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

// ── Response helpers ─────────────────────────────────────────────────

fn text_result(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Render hits as `[slot] text` lines, nearest first.
#[must_use]
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }
    results
        .iter()
        .map(|r| format!("[{}] {}", r.slot, r.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_mcp_error(err: RagError) -> McpError {
    match &err {
        RagError::InvalidArgument { field, .. } => McpError::invalid_params(
            err.to_string(),
            Some(json!({ "kind": error_kind::INVALID_ARGUMENT, "field": field })),
        ),
        RagError::Embedding(_) => McpError::internal_error(
            err.to_string(),
            Some(json!({ "kind": error_kind::EMBEDDING_PROVIDER })),
        ),
        RagError::DimensionMismatch { .. } => McpError::internal_error(
            err.to_string(),
            Some(json!({ "kind": error_kind::DIMENSION_MISMATCH })),
        ),
        RagError::Db(_) => McpError::internal_error(
            err.to_string(),
            Some(json!({ "kind": error_kind::INTERNAL })),
        ),
    }
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct RagTools {
    pub service: Arc<RetrievalService>,
    pub tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for RagTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Retrieval over an in-memory vector index. Call index_docs to add \
                 documents, then retrieve_docs to fetch the closest ones."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}

#[tool_router]
impl RagTools {
    pub fn new(service: Arc<RetrievalService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: index_docs ──────────────────────────────────────────

    #[tool(description = "Add a batch of documents to the index")]
    async fn index_docs(
        &self,
        params: Parameters<IndexDocsParams>,
    ) -> Result<CallToolResult, McpError> {
        let docs = params.0.docs;
        info!("index_docs: {} documents", docs.len());

        let report = self.service.ingest(docs).await.map_err(|e| {
            warn!("index_docs failed: {e}");
            to_mcp_error(e)
        })?;

        text_result(report.to_string())
    }

    // ── Tool 2: retrieve_docs ───────────────────────────────────────

    #[tool(description = "Retrieve the documents most relevant to a query")]
    async fn retrieve_docs(
        &self,
        params: Parameters<RetrieveDocsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        info!("retrieve_docs: top_k={}", p.top_k);

        let results = self
            .service
            .query(&p.query, p.top_k)
            .await
            .map_err(|e| {
                warn!("retrieve_docs failed: {e}");
                to_mcp_error(e)
            })?;

        text_result(format_results(&results))
    }
}
