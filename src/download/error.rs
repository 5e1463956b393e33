//! Error types for the download module.
//!
//! [`DownloadError`] is what callers of the downloader see. [`FetchError`] is
//! what a [`FileFetcher`](super::FileFetcher) reports for a single remote call;
//! it is classified for retry decisions and wrapped into
//! [`DownloadError::RemoteFetchFailed`] once retries are exhausted.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the downloader's caller-facing operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The download manager has not been started (or has been stopped).
    #[error("downloader not started")]
    NotStarted,

    /// An argument was rejected before any work was done.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// The target directory path is occupied by something that is not a directory.
    #[error("{path} exists and is not a directory")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The remote fetch failed and retries were exhausted (or not applicable).
    #[error("failed to fetch {url} after {attempts} attempt(s): {source}")]
    RemoteFetchFailed {
        /// The URL that could not be fetched.
        url: String,
        /// How many calls were made to the fetcher.
        attempts: u32,
        /// The last error reported by the fetcher.
        #[source]
        source: FetchError,
    },

    /// The operation was aborted through its cancellation token.
    #[error("download cancelled")]
    Cancelled,

    /// Local file system error (creating the directory or destination file).
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The work queue has no consumers left (all workers exited).
    #[error("download queue closed")]
    QueueClosed,
}

impl DownloadError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(reason: &'static str) -> Self {
        Self::InvalidArgument { reason }
    }

    /// Creates a not-a-directory error.
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Creates a remote fetch failure.
    pub fn remote_fetch_failed(url: impl Into<String>, attempts: u32, source: FetchError) -> Self {
        Self::RemoteFetchFailed {
            url: url.into(),
            attempts,
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error came from cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors reported by a single call to a [`FileFetcher`](super::FileFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Server-mandated delay from a Retry-After header, if any.
        retry_after: Option<Duration>,
    },

    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Writing the body to the destination failed.
    #[error("IO error writing body: {0}")]
    Io(#[from] std::io::Error),

    /// Any other fetcher-specific failure. Treated as transient.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error carrying a parsed Retry-After delay.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a free-form error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns the server-mandated delay, if the error carries one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
