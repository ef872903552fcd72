//! CLI entry point for scrapeshell.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use scrapelib::{FileCache, Scraper, ScraperConfig};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the response body
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args).await?;
    let mut builder = Scraper::builder().config(config);
    if let Some(dir) = &args.cache_dir {
        let cache = FileCache::new(dir)
            .with_context(|| format!("cannot use cache directory {}", dir.display()))?;
        builder = builder.cache(Arc::new(cache));
    }
    let scraper = builder.build().context("failed to build scraper")?;

    let response = match &args.postdata {
        Some(data) => scraper.post(&args.url, data.clone()).await?,
        None => scraper.get(&args.url).await?,
    };

    info!(
        status = response.status(),
        url = response.url(),
        bytes = response.bytes().len(),
        from_cache = response.from_cache(),
        "Fetched"
    );

    if let Some(path) = &args.output {
        tokio::fs::write(path, response.bytes())
            .await
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), "Saved body");
    } else {
        let mut stdout = std::io::stdout().lock();
        if args.include {
            writeln!(stdout, "{} {}", response.status(), response.url())?;
            for (name, value) in response.headers() {
                writeln!(stdout, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
            }
            writeln!(stdout)?;
        }
        stdout.write_all(response.bytes())?;
        stdout.flush()?;
    }

    if response.is_error() {
        bail!("{} while retrieving {}", response.status(), response.url());
    }
    Ok(())
}

/// Builds the effective config: the --config file (or defaults with robots
/// ignored), then command-line overrides.
async fn load_config(args: &Args) -> Result<ScraperConfig> {
    let mut config = match &args.config {
        Some(path) => ScraperConfig::load(path).await?,
        None => ScraperConfig {
            follow_robots: false,
            ..ScraperConfig::default()
        },
    };

    // Print error bodies instead of failing before output
    config.raise_errors = false;
    if let Some(ua) = &args.user_agent {
        config.user_agent.clone_from(ua);
    }
    if args.robots {
        config.follow_robots = true;
    }
    if args.no_redirect {
        config.follow_redirects = false;
    }
    if let Some(rpm) = args.rpm {
        config.requests_per_minute = rpm;
    }
    if let Some(retries) = args.retries {
        config.retry_attempts = retries;
    }
    Ok(config)
}
