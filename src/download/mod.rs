//! Concurrent, rate-limited downloading of workspace file attachments.
//!
//! A [`DownloadManager`] owns a pool of workers reading from a bounded queue.
//! Each worker saves files through a [`Downloader`], which paces remote calls
//! with a shared [`RateLimiter`], retries transient failures per
//! [`RetryPolicy`], and streams the body into `<directory>/<id>-<name>`.
//!
//! Two ways to feed it:
//!
//! - long-lived: [`DownloadManager::start`], then
//!   [`DownloadManager::enqueue`] from anywhere, then
//!   [`DownloadManager::stop`]
//! - batch: [`DownloadManager::download_all`] with a stream of
//!   [`Descriptor`]s, deduplicated per directory, and a [`Completion`] that
//!   resolves once every file has been processed
//!
//! The remote side is abstracted by [`FileFetcher`]; [`HttpFetcher`] is the
//! reqwest-backed implementation.

mod client;
mod completion;
mod descriptor;
mod error;
mod executor;
mod fetcher;
mod filename;
mod filter;
mod manager;
mod pool;
pub mod rate_limiter;
mod retry;

pub use client::{HttpFetcher, parse_retry_after};
pub use completion::{BatchSummary, Completion, CompletionBarrier};
pub use descriptor::{Descriptor, Request};
pub use error::{DownloadError, FetchError};
pub use executor::{Downloader, ensure_dir};
pub use fetcher::{Destination, FileFetcher};
pub use filename::filename;
pub use filter::{SeenFilter, filter_seen};
pub use manager::DownloadManager;
pub use rate_limiter::RateLimiter;
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision,
    RetryPolicy, classify_error,
};
