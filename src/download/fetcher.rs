//! The remote fetch seam.
//!
//! The downloader does not speak the content service's protocol itself. It
//! layers pacing, retry and concurrency around a [`FileFetcher`], which only
//! has to copy one URL's body into a writer.

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::FetchError;

/// Destination handed to a fetcher: the opened download file.
pub type Destination<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Fetches a remote file body into a destination writer.
///
/// Implementations must not retry internally; the downloader owns retries.
/// A failed call may leave partial data in `dest`; the next attempt starts
/// from a truncated file.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    /// Copies the body at `url` into `dest`.
    async fn fetch(&self, url: &str, dest: Destination<'_>) -> Result<(), FetchError>;
}
