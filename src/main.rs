//! # twin-context CLI (`twinctx`)
//!
//! The `twinctx` binary runs the context service and exercises its
//! retrieval, chat, and cache layers from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! twinctx --config ./config/twinctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `twinctx serve` | Start the HTTP server |
//! | `twinctx search "<query>"` | Search indexed profile content |
//! | `twinctx chat "<message>"` | One-shot grounded reply |
//! | `twinctx suggest` | Print suggested questions |
//! | `twinctx cache clear '<pattern>'` | Invalidate cached entries |
//! | `twinctx health` | Ping configured upstreams |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use twin_context::app::Services;
use twin_context::config::load_config;
use twin_context::models::{MetadataFilter, SearchOptions};
use twin_context::server;

/// twin-context — a retrieval-augmented context service for AI profile
/// assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/twinctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "twinctx",
    about = "twin-context — a retrieval-augmented context service for AI profile assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/twinctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves the realtime context endpoint, the tools API, and health
    /// checks on the configured bind address.
    Serve,

    /// Search indexed profile content.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Minimum similarity score in [0, 1].
        #[arg(long, default_value_t = 0.6)]
        min_score: f64,

        /// Only return chunks of this content category
        /// (e.g. experience, skills, projects).
        #[arg(long)]
        chunk_type: Option<String>,

        /// Only return chunks with this importance level (e.g. critical).
        #[arg(long)]
        importance: Option<String>,
    },

    /// Generate a one-shot reply grounded in retrieved context.
    Chat {
        /// The user message.
        message: String,
    },

    /// Print suggested questions for the chat surface.
    Suggest,

    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Ping configured upstreams and print their status.
    Health,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete cached entries matching a glob pattern (e.g. 'rag:*').
    Clear {
        /// Glob pattern of keys to delete.
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so stdout stays parseable for scripts.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&config).await,
        Commands::Search {
            query,
            top_k,
            min_score,
            chunk_type,
            importance,
        } => run_search(&config, &query, top_k, min_score, chunk_type, importance).await,
        Commands::Chat { message } => run_chat(&config, &message).await,
        Commands::Suggest => run_suggest(&config).await,
        Commands::Cache {
            command: CacheCommands::Clear { pattern },
        } => run_cache_clear(&config, &pattern).await,
        Commands::Health => run_health(&config).await,
    }
}

async fn run_search(
    config: &twin_context::config::Config,
    query: &str,
    top_k: usize,
    min_score: f64,
    chunk_type: Option<String>,
    importance: Option<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let services = Services::from_config(config).await?;

    let filter = if chunk_type.is_some() || importance.is_some() {
        Some(MetadataFilter {
            chunk_type,
            importance,
        })
    } else {
        None
    };

    let opts = SearchOptions {
        top_k,
        min_score,
        include_metadata: true,
        filter,
    };
    let results = services.retriever.search(query, &opts).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.metadata.title.as_deref().unwrap_or("(untitled)");
        let chunk_type = result.metadata.chunk_type.as_deref().unwrap_or("general");

        println!("{}. [{:.2}] {} / {}", i + 1, result.score, chunk_type, title);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&result.content).replace('\n', " ")
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

fn excerpt(content: &str) -> String {
    const EXCERPT_CHARS: usize = 240;
    let mut excerpt: String = content.trim().chars().take(EXCERPT_CHARS).collect();
    if content.trim().chars().count() > EXCERPT_CHARS {
        excerpt.push('…');
    }
    excerpt
}

async fn run_chat(config: &twin_context::config::Config, message: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    let reply = services.composer.generate_reply(message, &[]).await;

    println!("{}", reply.response);

    if !reply.sources.is_empty() {
        println!();
        println!("sources:");
        for source in &reply.sources {
            println!(
                "  [{:.2}] {} ({})",
                source.relevance_score, source.title, source.kind
            );
        }
    }

    if reply.degraded {
        eprintln!("note: degraded reply (no live model or retrieval)");
    }

    Ok(())
}

async fn run_suggest(config: &twin_context::config::Config) -> Result<()> {
    let services = Services::from_config(config).await?;
    for (i, question) in services.composer.suggested_questions().await.iter().enumerate() {
        println!("{}. {}", i + 1, question);
    }
    Ok(())
}

async fn run_cache_clear(config: &twin_context::config::Config, pattern: &str) -> Result<()> {
    let services = Services::from_config(config).await?;
    let removed = services.cache.invalidate(pattern).await?;
    println!("Invalidated {} cache entries matching {}", removed, pattern);
    Ok(())
}

async fn run_health(config: &twin_context::config::Config) -> Result<()> {
    let services = Services::from_config(config).await?;

    let vector = if services.vector_configured {
        "configured"
    } else {
        "unavailable"
    };
    let cache = if !services.cache.is_enabled() {
        "unavailable"
    } else if services.cache.ping().await.is_ok() {
        "ok"
    } else {
        "unreachable"
    };
    let database = match &services.chunks {
        Some(chunks) if chunks.ping().await.is_ok() => "ok",
        Some(_) => "unreachable",
        None => "unavailable",
    };

    println!("vector:    {}", vector);
    println!("cache:     {}", cache);
    println!("database:  {}", database);

    Ok(())
}
