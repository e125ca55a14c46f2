// platecache - Two-tier remote image cache for the meal and workout tracker client
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use platecache::cache::{CacheConfig, CacheManager, DownsampleTarget};
use platecache::cli::{Args, Command};
use platecache::config::AppConfig;
use platecache::fetch::HttpFetcher;
use platecache::metrics;
use platecache::utils::logging;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(dir) = args.cache_dir.clone() {
        config.cache.cache_dir = dir;
    }

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting platecache v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Run the command
    match args.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Fetch {
            urls,
            max_width,
            max_height,
        } => {
            let cache = open_cache(&config).await?;
            let target = match (max_width, max_height) {
                (Some(w), Some(h)) => Some(DownsampleTarget::new(w, h)?),
                _ => None,
            };

            let resolutions: Vec<_> = urls
                .iter()
                .map(|url| cache.resolve(Some(url.as_str()), target).into_result())
                .collect();

            for (url, outcome) in urls.iter().zip(join_all(resolutions).await) {
                match outcome {
                    Ok(Some(handle)) => {
                        let (w, h) = handle.dimensions();
                        println!("{}\t{}x{}\t{}", url, w, h, handle.origin().as_str());
                    }
                    Ok(None) => println!("{}\tplaceholder", url),
                    Err(e) => println!("{}\terror: {}", url, e),
                }
            }
        }
        Command::Clear => {
            let cache = open_cache(&config).await?;
            cache.clear_all().await?;
            println!("Cache cleared");
        }
        Command::Sweep => {
            let cache = open_cache(&config).await?;
            let report = cache.sweep_expired().await;
            println!(
                "Removed {} expired entries ({} bytes)",
                report.removed, report.bytes_freed
            );
        }
        Command::Stats { metrics: show_metrics } => {
            let cache = open_cache(&config).await?;
            let stats = cache.stats();
            let limits = cache.limits();
            println!("Cache directory: {}", config.cache.cache_dir.display());
            println!(
                "Disk: {} entries, {} / {} bytes",
                stats.disk_entries, stats.disk_bytes, limits.disk_byte_limit
            );
            println!("Expiration window: {}s", limits.expiration.as_secs());
            if show_metrics {
                print!("{}", metrics::gather_metrics());
            }
        }
    }

    Ok(())
}

async fn open_cache(config: &AppConfig) -> Result<CacheManager> {
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    // One-shot commands; `sweep` runs the expiration pass explicitly.
    let cache_config = CacheConfig {
        sweep_interval_seconds: 0,
        ..config.cache.clone()
    };
    let cache = CacheManager::new(&cache_config, fetcher).await?;
    Ok(cache)
}
