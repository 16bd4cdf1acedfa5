//! cortex-kg CLI - knowledge-graph ingestion and query service

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cortex_kg::{Config, DocumentSource, KnowledgeGraph, telemetry};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cortex-kg")]
#[command(author, version, about = "Knowledge-graph construction and query engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML). Falls back to $CORTEX_KG_CONFIG, then defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ingest documents inline and print one report per document
    Ingest {
        /// Files to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run a textual query and print the rows as JSON
    Query {
        /// e.g. "MATCH Article -[requires]-> DEPTH 1"
        text: String,
    },

    /// Print the graph as a Cypher script
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .context("loading configuration")?;
    telemetry::init_tracing(&config.logging.filter);

    let kg = KnowledgeGraph::from_config(&config).context("opening knowledge graph")?;
    if !kg.store().is_durable() && !matches!(cli.command, Commands::Serve { .. }) {
        warn!("no store.journal configured; this graph lives only for this command");
    }

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            cortex_kg::http::serve(&config, kg).await?;
        }
        Commands::Ingest { paths } => {
            let mut failed = 0usize;
            for path in paths {
                let report = kg.ingest(DocumentSource::path(path)).await?;
                if !report.is_committed() {
                    failed += 1;
                }
                println!("{}", serde_json::to_string(&report)?);
            }
            kg.shutdown().await?;
            info!(failed, "ingestion finished");
            if failed > 0 {
                anyhow::bail!("{failed} document(s) failed");
            }
        }
        Commands::Query { text } => {
            let result = kg.query_text(&text)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Export { output } => {
            let snapshot = kg.snapshot();
            let stats = match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    cortex_kg::export::export_cypher_dump(&snapshot, &mut file)?
                }
                None => cortex_kg::export::export_cypher_dump(&snapshot, &mut std::io::stdout().lock())?,
            };
            info!(entities = stats.entities, relations = stats.relations, "export finished");
        }
    }
    Ok(())
}
