//! LexGraph CLI - maintenance interface for the search engine
//!
//! Commands:
//! - `init` - bootstrap the store schema and warm up the model
//! - `verify` - report the state of every required index
//! - `ingest` - ingest a document from a file or stdin
//! - `search` - query the engine
//! - `suggest` - intent-name suggestions for a prefix
//! - `status` - node and edge counts
//! - `health` - run the health probe

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lexgraph_config::ConfigLoader;
use lexgraph_search::{Engine, IngestRequest, SearchRequest, Strategy};

/// LexGraph - multilingual hybrid semantic search over a knowledge graph
#[derive(Parser)]
#[command(name = "lexgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (default: ./lexgraph.toml)
    #[arg(short, long, global = true, env = "LEXGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the store schema and warm up the embedding model
    Init,

    /// Verify that every required index and constraint is online
    Verify,

    /// Ingest a document
    Ingest {
        /// File to ingest; reads stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Source document identifier
        #[arg(short, long)]
        source: String,

        /// Language hint (detected per chunk when omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Intent names to anchor the chunks to
        #[arg(short, long)]
        intent: Vec<String>,
    },

    /// Search the knowledge graph
    Search {
        /// Search query
        query: String,

        /// Strategy: vector, fulltext, hybrid, or intent
        #[arg(short, long, default_value = "hybrid")]
        strategy: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "10")]
        k: usize,

        /// Restrict results to one language
        #[arg(short, long)]
        language: Option<String>,

        /// Attach related graph nodes to the response
        #[arg(long)]
        expand: bool,

        /// Expansion depth (1..=3)
        #[arg(long, default_value = "1")]
        depth: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Suggest intent names for a prefix
    Suggest {
        /// Prefix (at least 2 characters)
        prefix: String,
    },

    /// Show node and edge counts
    Status,

    /// Run the health probe
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;

    let engine = Engine::from_config(config)
        .await
        .context("failed to assemble engine")?;

    match cli.command {
        Commands::Init => {
            engine.start().await?;
            println!("Schema bootstrapped, model loaded.");
        }

        Commands::Verify => {
            let report = engine.verify_schema().await?;
            for item in &report.items {
                println!("{:30} {:18} {}", item.name, item.kind.to_string(), item.state);
            }
            if !report.is_healthy() {
                anyhow::bail!("schema verification failed: {:?}", report.failing());
            }
        }

        Commands::Ingest {
            file,
            source,
            language,
            intent,
        } => {
            engine.ensure_schema().await?;
            let document = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("cannot read stdin")?;
                    buffer
                }
            };

            let report = engine
                .ingest(IngestRequest {
                    document,
                    source_doc: source,
                    language,
                    intents: intent,
                })
                .await?;

            println!(
                "Ingested {} chunks, skipped {} duplicates, {} failures.",
                report.chunks_ingested,
                report.chunks_skipped,
                report.failures.len()
            );
            for failure in &report.failures {
                println!("  chunk {}: {}", failure.position, failure.reason);
            }
        }

        Commands::Search {
            query,
            strategy,
            k,
            language,
            expand,
            depth,
            json,
        } => {
            let strategy: Strategy = strategy.parse()?;
            let mut request = SearchRequest::new(query).with_strategy(strategy).with_k(k);
            if let Some(language) = language {
                request = request.with_language(language);
            }
            if expand {
                request = request.with_expansion(depth);
            }

            let response = engine.search(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!(
                    "{} results ({}, {} ms{})",
                    response.total_results,
                    response.strategy_used,
                    response.search_time_ms,
                    if response.partial { ", partial" } else { "" }
                );
                for (i, result) in response.results.iter().enumerate() {
                    println!(
                        "{:2}. [{:.3}] {} #{} ({})",
                        i + 1,
                        result.score,
                        result.source_doc,
                        result.position,
                        result.language
                    );
                    println!("      {}", truncate(&result.content, 120));
                }
                if let Some(related) = &response.related_nodes {
                    println!(
                        "related: {} nodes, {} edges",
                        related.nodes.len(),
                        related.edges.len()
                    );
                }
            }
        }

        Commands::Suggest { prefix } => {
            for name in engine.suggest(&prefix).await? {
                println!("{name}");
            }
        }

        Commands::Status => {
            let counts = engine.counts().await?;
            println!("chunks:  {}", counts.chunks);
            println!("intents: {}", counts.intents);
            println!("phases:  {}", counts.phases);
            println!("edges:   {}", counts.edges);
        }

        Commands::Health => {
            let report = engine.health().await;
            println!("{report}");
            if !report.healthy {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_chars).collect();
        format!("{prefix}…")
    }
}
