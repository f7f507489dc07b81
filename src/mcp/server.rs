//! MCP server setup using `rmcp` with stdio transport.
//!
//! Provides `McpContext` (shared state) and `McpServer` (startup logic).
use crate::mcp::tools::AppTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tracing::info;

use crate::app::App;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::search::SearchOrchestrator;

/// Shared application context available to all tool handlers.
#[derive(Clone)]
pub struct McpContext {
    pub config: Arc<Config>,
    pub search: Arc<SearchOrchestrator>,
    pub catalog: Arc<Catalog>,
}

impl From<&App> for McpContext {
    fn from(app: &App) -> Self {
        Self {
            config: app.config.clone(),
            search: app.search.clone(),
            catalog: app.catalog.clone(),
        }
    }
}

/// MCP Server wrapping the context and serving via stdio.
#[derive(Clone)]
pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(ctx: McpContext) -> Self {
        Self { ctx }
    }

    /// Serve on stdio until the client disconnects.
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        let service = router
            .serve((stdin, stdout))
            .await
            .context("MCP server failed to initialize on stdio")?;
        let reason = service
            .waiting()
            .await
            .context("MCP server task failed")?;
        info!("MCP server stopped: {reason:?}");

        Ok(())
    }
}
