//! Attachment Downloader Library
//!
//! Downloads the files attached to an exported workspace: given file
//! descriptors (id, name, URL, size) and a target directory, saves each file
//! as `<directory>/<id>-<name>` using a pool of concurrent workers that share
//! one rate limiter and retry transient failures.
//!
//! # Architecture
//!
//! - [`config`] - Constructor-time settings and their validation
//! - [`download`] - Worker pool, rate limiting, retries, deduplication and
//!   the reqwest-backed fetcher

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;

// Re-export commonly used types
pub use config::{ConfigError, DownloaderConfig};
pub use download::{
    BatchSummary, Completion, DEFAULT_MAX_RETRIES, Descriptor, DownloadError, DownloadManager,
    Downloader, FailureType, FetchError, FileFetcher, HttpFetcher, RateLimiter, RetryPolicy,
    classify_error,
};
