//! Demo initiator: spawns the server, indexes two documents, runs a query.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mcp_rag::logging;
use mcp_rag::mcp::client::RagSession;
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rag-client", version, about)]
struct Args {
    /// Server executable to spawn
    server: PathBuf,

    /// Extra argument passed to the server (repeatable)
    #[arg(long = "server-arg")]
    server_args: Vec<String>,

    /// Documents to index (repeatable)
    #[arg(long = "doc", default_values_t = [
        "今天天气很好".to_string(),
        "机器学习和深度学习的区别".to_string(),
    ])]
    docs: Vec<String>,

    /// Query to run after indexing
    #[arg(long, default_value = "深度学习 是 什么")]
    query: String,

    /// Number of documents to retrieve
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let server = std::path::absolute(&args.server)
        .with_context(|| format!("invalid server path: {}", args.server.display()))?;
    let mut command = Command::new(&server);
    command.args(&args.server_args);
    let transport = TokioChildProcess::new(command)
        .with_context(|| format!("failed to spawn {}", server.display()))?;

    let session = RagSession::with_call_timeout(Duration::from_secs(args.timeout_secs));
    session.connect(transport).await?;

    // The session must be closed even if a call fails.
    let outcome = run(&session, &args).await;
    session.close().await?;
    outcome
}

async fn run(session: &RagSession, args: &Args) -> Result<()> {
    let tools = session.list_tools().await?;
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    println!("available tools: {names:?}");

    let summary = session.index_docs(&args.docs).await?;
    println!("index_docs: {summary}");

    info!("Querying: {}", args.query);
    let docs = session.retrieve_docs(&args.query, args.top_k).await?;
    if docs.is_empty() {
        println!("retrieve_docs: no results");
    } else {
        println!("retrieve_docs:");
        for doc in docs {
            println!("  [{}] {}", doc.slot, doc.text);
        }
    }
    Ok(())
}
