//! CLI entry point for the attachment downloader.

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use attachment_downloader::{Descriptor, DownloadManager, DownloaderConfig, HttpFetcher};
use clap::Parser;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(manifest = %args.manifest.display(), output = %args.output.display(), "CLI arguments parsed");

    let config = build_config(&args)?;
    let files = read_manifest(&args)?;
    info!(files = files.len(), "manifest loaded");

    create_export_dir(&args.output)?;

    let mut fetcher = HttpFetcher::new().context("failed to build HTTP client")?;
    if let Some(token) = &args.token {
        fetcher = fetcher.with_bearer_token(token.clone());
    }
    let manager = DownloadManager::new(Arc::new(fetcher), &config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling downloads");
                cancel.cancel();
            }
        });
    }

    let summary = manager
        .download_all(cancel, args.output.clone(), stream::iter(files))
        .await?
        .wait()
        .await;

    println!(
        "{} of {} files downloaded ({} bytes), {} failed",
        summary.succeeded, summary.dispatched, summary.bytes, summary.failed
    );

    if summary.cancelled {
        bail!("download interrupted");
    }
    if summary.failed > 0 {
        bail!("{} file(s) failed to download", summary.failed);
    }
    Ok(())
}

/// Config file (if any) overlaid with the flags given on the command line.
fn build_config(args: &Args) -> Result<DownloaderConfig> {
    let mut config = match &args.config {
        Some(path) => DownloaderConfig::from_file(path)?,
        None => DownloaderConfig::default(),
    };

    if let Some(workers) = args.workers {
        config.workers = usize::from(workers);
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(rate_limit) = args.rate_limit {
        config.rate_limit = rate_limit;
    }
    if let Some(burst) = args.burst {
        config.burst = burst;
    }

    config.validate()?;
    debug!(?config, "effective config");
    Ok(config)
}

fn read_manifest(args: &Args) -> Result<Vec<Descriptor>> {
    let raw = if args.manifest_from_stdin() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read manifest from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&args.manifest)
            .with_context(|| format!("failed to read manifest {}", args.manifest.display()))?
    };

    serde_json::from_str(&raw).context("manifest must be a JSON array of file descriptors")
}

/// Creates the export directory, owner-only on unix.
fn create_export_dir(path: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .with_context(|| format!("failed to create export directory {}", path.display()))
}
