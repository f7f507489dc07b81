use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use legal_rag::app::App;
use legal_rag::config::{Config, DEFAULT_CONFIG_PATH};
use legal_rag::error::ErrorEnvelope;
use legal_rag::ingest::Ingester;
use legal_rag::mcp::server::{McpContext, McpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "legal-rag", version, about = "Legal document retrieval MCP server")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP tools over stdio (default)
    Serve,
    /// Run one search and print the JSON response
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// practice_guide | agreement | clause
        #[arg(long = "type")]
        document_type: Option<String>,
    },
    /// Embed and store JSON Lines documents in the SQLite store
    Ingest { file: PathBuf },
}

fn main() -> Result<()> {
    // stdout belongs to the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load config
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    // 2. Build the runtime with a bounded blocking pool
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.runtime.blocking_threads)
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(run(cli.command.unwrap_or(Command::Serve), config))
}

async fn run(command: Command, config: Config) -> Result<()> {
    // 3. Wire services
    let app = App::build(config)?;

    match command {
        Command::Serve => {
            info!("Starting legal-rag MCP Server...");
            McpServer::new(McpContext::from(&app)).start().await?;
        }
        Command::Search {
            query,
            top_k,
            document_type,
        } => {
            let top_k = top_k.unwrap_or(app.config.search.default_top_k);
            let output = match app.search.search(&query, top_k, document_type.as_deref()).await {
                Ok(response) => serde_json::to_string_pretty(&response)?,
                Err(e) => serde_json::to_string_pretty(&ErrorEnvelope::from(e))?,
            };
            println!("{output}");
        }
        Command::Ingest { file } => {
            let store = app
                .sqlite
                .clone()
                .context("ingest requires the sqlite store backend")?;
            let result = Ingester::new(store, app.embedder.as_ref())
                .ingest_file(&file)
                .await?;
            info!(
                "Ingest finished: {} indexed, {} skipped, {} failed",
                result.indexed, result.skipped, result.failed
            );
        }
    }

    Ok(())
}
