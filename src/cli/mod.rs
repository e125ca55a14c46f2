// CLI module for platecache
// Author: kelexine (https://github.com/kelexine)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// platecache - Two-tier remote image cache for the meal and workout tracker client
#[derive(Parser, Debug)]
#[command(name = "platecache", version, about, long_about = None)]
pub struct Args {
    /// Config file (default: ~/.platecache/config.toml)
    #[arg(long, global = true, env = "PLATECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the disk cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve images through the cache and report where each came from
    Fetch {
        /// Image URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Downsample box width
        #[arg(long, requires = "max_height")]
        max_width: Option<u32>,

        /// Downsample box height
        #[arg(long, requires = "max_width")]
        max_height: Option<u32>,
    },

    /// Remove every cached image
    Clear,

    /// Remove expired entries from the disk cache
    Sweep,

    /// Show disk cache usage
    Stats {
        /// Also print Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}
