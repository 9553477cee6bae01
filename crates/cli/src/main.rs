//! httpcache command-line entry point.
//!
//! Output is JSON lines on stdout. Logging goes to stderr so the two never mix.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use httpcache_client::FetchConfig;
use httpcache_core::CacheConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "httpcache")]
#[command(about = "Fetch URLs through an on-disk HTTP response cache", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache root directory, overriding HTTPCACHE_DIR
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch URLs through the cache and print one JSON line per URL
    Fetch {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,

        /// Cache namespace (default: the URL host)
        #[arg(short, long)]
        namespace: Option<String>,

        /// User agent sent with every request
        #[arg(long, default_value = "httpcache/0.1")]
        user_agent: String,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 20)]
        timeout_secs: u64,

        /// Maximum response body size in bytes
        #[arg(long, default_value_t = 5 * 1024 * 1024)]
        max_bytes: usize,
    },

    /// Print the stored record for a URL, or report a miss
    Show {
        /// URL of the cached request
        url: String,

        /// Cache namespace (default: the URL host)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Request method of the cached request
        #[arg(short, long, default_value = "GET")]
        method: String,
    },

    /// Remove expired and unreadable records from a namespace
    Purge {
        /// Cache namespace, as used by `fetch` (usually the URL host)
        #[arg(short, long)]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = CacheConfig::load()?;
    if let Some(dir) = cli.cache_dir {
        config.dir = Some(dir);
    }
    tracing::debug!(?config, "loaded cache configuration");

    match cli.command {
        Commands::Fetch { urls, namespace, user_agent, timeout_secs, max_bytes } => {
            let timeout = Duration::from_secs(timeout_secs);
            let fetch = FetchConfig { user_agent, timeout, max_bytes, ..Default::default() };
            commands::fetch(&config, fetch, &urls, namespace.as_deref()).await
        }
        Commands::Show { url, namespace, method } => commands::show(&config, &url, namespace.as_deref(), &method).await,
        Commands::Purge { namespace } => commands::purge(&config, &namespace).await,
    }
}
