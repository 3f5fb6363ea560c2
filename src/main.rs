use anyhow::{Context, Result};
use clap::Parser;
use mcp_rag::config::{Config, ProviderKind};
use mcp_rag::embedder;
use mcp_rag::logging;
use mcp_rag::mcp::server::McpServer;
use mcp_rag::service::RetrievalService;
use std::sync::Arc;
use tracing::info;

/// RAG MCP server: serves `index_docs` and `retrieve_docs` over stdio.
#[derive(Parser, Debug)]
#[command(name = "rag-server", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "RAG_CONFIG", default_value = "config.json")]
    config: String,

    /// Embedding provider (deepseek, openai, ali, claude, hashing); overrides config and API_PROVIDER
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Write the effective configuration to --config and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    // 1. Load config (logging first, so load warnings reach stderr)
    let source = Config::read(&args.config)?;
    logging::init(source.log_level());

    let mut config = Config::resolve(&args.config, source);
    config.apply_env()?;
    if let Some(provider) = args.provider {
        config.embedding.provider = provider;
    }
    config.validate()?;

    if args.init_config {
        config.save(&args.config)?;
        info!("Wrote configuration to {}", args.config);
        return Ok(());
    }

    info!("Starting RAG MCP server...");

    // 2. Init embedding provider (selected once)
    let embedder =
        embedder::from_config(&config.embedding).context("Failed to initialize embedder")?;

    // 3. Init retrieval service
    let service = RetrievalService::new(
        embedder,
        config.embedding.dimensions,
        config.embedding.timeout(),
    )
    .context("Embedding provider does not match the configured index dimension")?;

    // 4. Start server
    let server = McpServer::new(Arc::new(service));
    server.start().await?;

    Ok(())
}
