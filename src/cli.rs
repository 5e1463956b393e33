//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download the files attached to a workspace export.
///
/// Reads a JSON array of file descriptors (`id`, `name`, `url`, `size`) and
/// saves each file as `<output>/<id>-<name>`.
#[derive(Parser, Debug)]
#[command(name = "attachment-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// JSON manifest of files to download, or `-` for stdin
    pub manifest: PathBuf,

    /// Directory to save files into (created if missing)
    #[arg(short, long)]
    pub output: PathBuf,

    /// JSON config file; flags given on the command line take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Concurrent download workers (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Maximum attempts per file, including the first (1-10)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub retries: Option<u32>,

    /// Remote calls per second across all workers (0 to disable)
    #[arg(short = 'l', long)]
    pub rate_limit: Option<f64>,

    /// Calls allowed back to back before pacing applies
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub burst: Option<u32>,

    /// Bearer token sent with every download
    #[arg(long, env = "EXPORT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// True when the manifest should be read from stdin.
    pub fn manifest_from_stdin(&self) -> bool {
        self.manifest.as_os_str() == "-"
    }
}
