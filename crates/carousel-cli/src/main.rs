//! Carousel CLI - Headless Player and Cache Tool
//!
//! Features:
//! - Capability probing of a configured platform profile
//! - Candidate chain resolution per catalog item
//! - Headless playback with live telemetry
//! - Play order inspection
//! - Segment cache statistics and maintenance

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Carousel CLI - Media delivery toolkit
#[derive(Parser)]
#[command(name = "carousel")]
#[command(version)]
#[command(about = "Adaptive media delivery engine toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Catalog file, overriding the configured one
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detected client capabilities
    Probe,

    /// Build the candidate chain for an item
    Resolve {
        /// Item id from the catalog
        item: String,

        /// Check candidate existence over HTTP
        #[arg(long)]
        check: bool,
    },

    /// Play the catalog headlessly, printing telemetry
    Play {
        /// Start at this catalog index
        #[arg(short, long)]
        index: Option<usize>,

        /// Stop after this many seconds
        #[arg(short, long, default_value = "60")]
        seconds: u64,
    },

    /// Show the persisted play order
    Order,

    /// Inspect or maintain the segment cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Fetch a URL through the segment cache
    Fetch {
        url: String,

        /// Write the body to a file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Hit ratio, size and counters
    Stats,
    /// List cached entries
    List,
    /// Remove expired entries
    Sweep,
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    carousel_core::init();

    let config = commands::load_config(cli.config.as_deref(), cli.catalog)?;

    match cli.command {
        Commands::Probe => {
            commands::probe(&config, &cli.format)?;
        }
        Commands::Resolve { item, check } => {
            commands::resolve(config, &item, check, &cli.format).await?;
        }
        Commands::Play { index, seconds } => {
            commands::play(config, index, seconds, &cli.format).await?;
        }
        Commands::Order => {
            commands::order(config, &cli.format).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => commands::cache_stats(config, &cli.format).await?,
            CacheAction::List => commands::cache_list(config, &cli.format).await?,
            CacheAction::Sweep => commands::cache_sweep(config).await?,
            CacheAction::Clear => commands::cache_clear(config).await?,
        },
        Commands::Fetch { url, output } => {
            commands::fetch(config, &url, output).await?;
        }
    }

    Ok(())
}
