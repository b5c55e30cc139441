//! sessioncache CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use sessioncache_foundation::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sessioncache - multi-tier cache for conversation sessions
#[derive(Parser, Debug)]
#[command(name = "sessioncache")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Keep the Persistent tier in memory for this run
    #[arg(long)]
    ephemeral: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read a value (falls back to the Remote tier with --history)
    Get {
        key: String,
        /// Allow Remote read-through
        #[arg(long)]
        history: bool,
    },
    /// Write a value; VALUE is parsed as JSON, otherwise stored as a string
    Set {
        key: String,
        value: String,
        /// hot, warm or cold
        #[arg(short, long)]
        temperature: Option<String>,
        /// Expire after this many seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Delete a key from the local tiers
    Delete { key: String },
    /// Show where a key currently lives
    Temperature { key: String },
    /// Search by title text, agent, tag or date range
    Search {
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<String>,
        /// RFC 3339 upper bound
        #[arg(long)]
        until: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List keys under a prefix
    List {
        #[arg(short, long, default_value = "")]
        prefix: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Capacity, temperature distribution and hit rate
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Run a maintenance pass
    Optimize,
    /// Warm the Fast tier with the given keys
    Preload { keys: Vec<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = default_log_level(args.debug);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    cli::run(&args.config, args.ephemeral, args.command).await
}

/// Filter used when `RUST_LOG` is unset
fn default_log_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}
