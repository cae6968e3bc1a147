//! # Attachment Indexer CLI (`attidx`)
//!
//! Runs one indexing batch: every attachment the candidate query yields is
//! sent to the extraction service and its text stored as searchable
//! segments.
//!
//! ```bash
//! attidx --tika-url http://tika.internal:9998 bugtracker
//! attidx "host=db.internal user=indexer dbname=bugtracker"
//! attidx --config ./attidx.toml postgres://indexer@db.internal/bugtracker
//! ```
//!
//! Per-attachment failures are logged and skipped; the process exits
//! non-zero only on store-level failures.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use attachment_indexer::{config, pipeline};

/// Extract text from stored attachments and index it for full-text search.
#[derive(Parser)]
#[command(name = "attidx", version)]
struct Cli {
    /// Extraction service (Tika) base URL.
    #[arg(long, default_value = "http://localhost:9998")]
    tika_url: String,

    /// Optional TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Postgres connection string: a URL, a key-value DSN, or a bare
    /// database name.
    conn: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()).await {
        error!(error = format!("{err:#}"), "run failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    pipeline::run(&config, &cli.tika_url, &cli.conn, &cancel).await
}
