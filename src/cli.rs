//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch a single URL through the scrapelib pipeline and print the body.
///
/// Without --config, robots.txt is ignored unless --robots is given.
#[derive(Parser, Debug)]
#[command(name = "scrapeshell")]
#[command(author, version, about)]
pub struct Args {
    /// URL to fetch (http:// is assumed when no scheme is given)
    pub url: String,

    /// User agent to make requests with
    #[arg(long = "ua")]
    pub user_agent: Option<String>,

    /// POST this data instead of issuing a GET
    #[arg(short = 'p', long = "postdata")]
    pub postdata: Option<String>,

    /// Obey robots.txt
    #[arg(long)]
    pub robots: bool,

    /// Don't follow redirects
    #[arg(long = "noredirect")]
    pub no_redirect: bool,

    /// Requests per minute (0 disables throttling)
    #[arg(long)]
    pub rpm: Option<f64>,

    /// Retry attempts after the first try
    #[arg(long)]
    pub retries: Option<i32>,

    /// Cache responses in this directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// JSON scraper config file (flags override its values)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the status line and headers before the body
    #[arg(short = 'i', long)]
    pub include: bool,

    /// Write the body to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
