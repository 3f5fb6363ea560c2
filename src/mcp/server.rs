//! MCP server setup using `rmcp`.
//!
//! Provides `McpServer`, which serves the tool set over stdio or any other
//! duplex transport.
use anyhow::{Context, Result};
use rmcp::transport::IntoTransport;
use rmcp::{RoleServer, ServiceExt, transport::io::stdio};
use std::sync::Arc;
use tracing::info;

use crate::mcp::tools::RagTools;
use crate::service::RetrievalService;

/// MCP server wrapping the retrieval service.
#[derive(Clone)]
pub struct McpServer {
    pub service: Arc<RetrievalService>,
}

impl McpServer {
    pub fn new(service: Arc<RetrievalService>) -> Self {
        Self { service }
    }

    /// Serve on stdio until the client disconnects.
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        self.serve(stdio()).await
    }

    /// Serve on `transport` until the peer disconnects or the transport breaks.
    pub async fn serve<T, E, A>(self, transport: T) -> Result<()>
    where
        T: IntoTransport<RoleServer, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let tools = RagTools::new(self.service);
        let running = tools
            .serve(transport)
            .await
            .context("MCP handshake failed")?;

        let reason = running
            .waiting()
            .await
            .context("MCP server task failed")?;
        info!("MCP session ended: {reason:?}");

        Ok(())
    }
}
