use clap::{Parser, Subcommand};
use std::path::PathBuf;
use webcache_engine::FreshnessMode;

#[derive(Parser, Debug)]
#[command(
    name = "webcache",
    about = "Webcache - fetch documents through a persistent disk cache",
    version,
    author
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WEBCACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory
    #[arg(short, long, global = true, env = "WEBCACHE_DIR")]
    pub dir: Option<PathBuf>,

    /// Cache budget (e.g. 500KB, 20MB)
    #[arg(short = 's', long, global = true)]
    pub max_size: Option<String>,

    /// Freshness policy: never, always, per-session or periodic
    #[arg(short, long, global = true)]
    pub freshness: Option<FreshnessMode>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a URL through the cache
    Fetch {
        /// The URL to fetch
        url: String,

        /// Write the body to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Bypass the cached copy and replace it
        #[arg(short, long)]
        reload: bool,
    },

    /// List cached documents, least recently used first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the cache entry for a URL
    Show {
        /// The URL to look up
        url: String,
    },

    /// Compact the transaction log
    Checkpoint,

    /// Delete every cached document
    Erase,

    /// Delete payload files that no cache entry references
    Prune,

    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show configuration information
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long)]
        reset: bool,
    },
}
