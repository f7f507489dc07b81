//! MCP tool handlers for legal-rag.
//!
//! Four tools:
//! 1. semantic_search_legal_documents – embed, retrieve, filter, rerank
//! 2. browse_legal_documents_by_type  – paginated listing of one type
//! 3. get_legal_document_by_id        – full document by UUID
//! 4. list_all_legal_documents        – paginated listing with totals
use crate::error::ErrorEnvelope;
use crate::mcp::server::McpContext;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
pub struct SemanticSearchParams {
    /// Natural language search query (max 1000 characters)
    pub query: String,
    /// Number of results to return (default: 10, max: 100)
    pub top_k: Option<i64>,
    /// Optional filter: practice_guide | agreement | clause
    pub document_type: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct BrowseParams {
    /// Type of document: practice_guide | agreement | clause
    pub document_type: String,
    /// Documents per page (default: 20, max: 100)
    pub limit: Option<i64>,
    /// Pagination offset (default: 0)
    pub offset: Option<i64>,
}

#[derive(Deserialize, JsonSchema)]
pub struct DocumentIdParams {
    /// UUID of the document
    pub document_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct ListParams {
    /// Documents per page (default: 50, max: 100)
    pub limit: Option<i64>,
    /// Pagination offset (default: 0)
    pub offset: Option<i64>,
    /// Include full document content (default: false)
    pub include_content: Option<bool>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )]))
}

fn error_result(envelope: ErrorEnvelope) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(
        serde_json::to_string_pretty(&envelope).unwrap_or_default(),
    )]))
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    // ── Tool 1: semantic_search_legal_documents ─────────────────────

    #[tool(
        description = "Semantic search across the startup legal corpus (practice guides, agreements, clauses). Uses vector similarity for recall and a reranking model for precision; results carry a relevance_score between 0 and 1."
    )]
    pub async fn semantic_search_legal_documents(
        &self,
        params: Parameters<SemanticSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let default_top_k = self.ctx.config.search.default_top_k;
        // Negative or oversized values fall through to validation
        let top_k = p
            .top_k
            .map_or(default_top_k, |k| usize::try_from(k).unwrap_or(0));

        match self
            .ctx
            .search
            .search(&p.query, top_k, p.document_type.as_deref())
            .await
        {
            Ok(response) => json_result(&response),
            Err(e) => {
                warn!("Search failed: {e}");
                error_result(e.into())
            }
        }
    }

    // ── Tool 2: browse_legal_documents_by_type ──────────────────────

    #[tool(
        description = "Browse legal documents of one type (practice_guide, agreement, clause) with pagination, newest first. Returns titles and 200-character summaries."
    )]
    pub async fn browse_legal_documents_by_type(
        &self,
        params: Parameters<BrowseParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .ctx
            .catalog
            .browse_by_type(&p.document_type, p.limit.unwrap_or(20), p.offset.unwrap_or(0))
            .await
        {
            Ok(page) => json_result(&page),
            Err(e) => {
                warn!("Browse failed: {e}");
                error_result(e.into())
            }
        }
    }

    // ── Tool 3: get_legal_document_by_id ────────────────────────────

    #[tool(description = "Retrieve one legal document by UUID, with full content and metadata")]
    pub async fn get_legal_document_by_id(
        &self,
        params: Parameters<DocumentIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.catalog.get_document(params.0.document_id.trim()).await {
            Ok(doc) => json_result(&doc),
            Err(e) => {
                warn!("Document lookup failed: {e}");
                error_result(e.into())
            }
        }
    }

    // ── Tool 4: list_all_legal_documents ────────────────────────────

    #[tool(
        description = "List all legal documents with pagination. Content is omitted unless include_content is true; metadata summaries are shown instead."
    )]
    pub async fn list_all_legal_documents(
        &self,
        params: Parameters<ListParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        match self
            .ctx
            .catalog
            .list_documents(
                p.limit.unwrap_or(50),
                p.offset.unwrap_or(0),
                p.include_content.unwrap_or(false),
            )
            .await
        {
            Ok(listing) => json_result(&listing),
            Err(e) => {
                warn!("List failed: {e}");
                error_result(e.into())
            }
        }
    }
}
