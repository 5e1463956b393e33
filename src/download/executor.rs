//! Rate-limited, retrying single-file download.
//!
//! [`Downloader`] is the unit the worker pool calls for every request, and
//! also the synchronous entry point for callers that want one file now and
//! want to see the error.

use std::path::Path;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::fetcher::FileFetcher;
use super::rate_limiter::RateLimiter;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{Descriptor, DownloadError, FetchError};

/// Saves remote files into local directories.
///
/// Cheap to share: wrap it in `Arc` and hand clones to every worker. The
/// rate limiter inside is the only state mutated across workers.
pub struct Downloader {
    fetcher: Arc<dyn FileFetcher>,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("rate_limiter", &self.rate_limiter)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader around `fetcher`.
    pub fn new(
        fetcher: Arc<dyn FileFetcher>,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            rate_limiter,
            retry_policy,
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Downloads `descriptor` into `directory` as `"{id}-{name}"`.
    ///
    /// Creates `directory` (recursively) if needed. Every call to the
    /// fetcher first takes a rate-limiter token; failures are retried per the
    /// retry policy, truncating the destination before each attempt.
    ///
    /// Returns the descriptor's declared size on success. The size is not
    /// re-measured, so a short body from the server is not detected here.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidArgument`] if `directory` is empty
    /// - [`DownloadError::NotADirectory`] if `directory` is occupied by a file
    /// - [`DownloadError::Io`] if the directory or file cannot be created
    /// - [`DownloadError::Cancelled`] if `cancel` fires
    /// - [`DownloadError::RemoteFetchFailed`] once retries are exhausted
    #[instrument(skip(self, cancel, directory, descriptor), fields(file_id = %descriptor.id, dir = %directory.display()))]
    pub async fn save_file(
        &self,
        cancel: &CancellationToken,
        directory: &Path,
        descriptor: &Descriptor,
    ) -> Result<u64, DownloadError> {
        ensure_dir(directory).await?;

        let path = directory.join(descriptor.filename());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempting download");

            self.rate_limiter.acquire(cancel).await?;

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                outcome = self.fetch_to(&path, &descriptor.url) => outcome?,
            };

            let error = match outcome {
                Ok(()) => {
                    info!(path = %path.display(), size = descriptor.size, "file saved");
                    return Ok(descriptor.size);
                }
                Err(e) => e,
            };

            let failure_type = classify_error(&error);
            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let retry_after = if failure_type == FailureType::RateLimited {
                        error.retry_after()
                    } else {
                        None
                    };
                    let delay = retry_after.unwrap_or(backoff_delay);

                    info!(
                        url = %descriptor.url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after.is_some(),
                        error = %error,
                        "retrying download"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %descriptor.url, %reason, "not retrying download");
                    return Err(DownloadError::remote_fetch_failed(
                        &descriptor.url,
                        attempt,
                        error,
                    ));
                }
            }
        }
    }

    /// One attempt: create/truncate the destination and let the fetcher fill it.
    ///
    /// The outer `Result` is a local file error (fatal for the request), the
    /// inner one is the fetcher's verdict (subject to retry).
    async fn fetch_to(
        &self,
        path: &Path,
        url: &str,
    ) -> Result<Result<(), FetchError>, DownloadError> {
        let file = File::create(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        if let Err(e) = self.fetcher.fetch(url, &mut writer).await {
            // Keep whatever arrived; the next attempt truncates.
            if let Err(flush_error) = writer.flush().await {
                debug!(path = %path.display(), error = %flush_error, "flush after failed fetch");
            }
            return Ok(Err(e));
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        Ok(Ok(()))
    }
}

/// Makes sure `directory` exists and is a directory, creating it if absent.
///
/// # Errors
///
/// - [`DownloadError::InvalidArgument`] for an empty path
/// - [`DownloadError::NotADirectory`] if a non-directory occupies the path
/// - [`DownloadError::Io`] if creation fails
pub async fn ensure_dir(directory: &Path) -> Result<(), DownloadError> {
    if directory.as_os_str().is_empty() {
        return Err(DownloadError::invalid_argument("directory must not be empty"));
    }

    match tokio::fs::metadata(directory).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DownloadError::not_a_directory(directory)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %directory.display(), "creating directory");
            tokio::fs::create_dir_all(directory)
                .await
                .map_err(|e| DownloadError::io(directory, e))
        }
        Err(e) => Err(DownloadError::io(directory, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::download::fetcher::Destination;

    /// Fetcher that answers from a script and records every URL it was asked for.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
        failures_before_success: usize,
        error: fn() -> FetchError,
    }

    impl ScriptedFetcher {
        fn succeeding() -> Self {
            Self::failing_then_ok(0, || FetchError::other("unused"))
        }

        fn always_failing(error: fn() -> FetchError) -> Self {
            Self::failing_then_ok(usize::MAX, error)
        }

        fn failing_then_ok(failures: usize, error: fn() -> FetchError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                failures_before_success: failures,
                error,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, dest: Destination<'_>) -> Result<(), FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            if n < self.failures_before_success {
                dest.write_all(b"partial").await?;
                return Err((self.error)());
            }
            dest.write_all(b"payload").await?;
            Ok(())
        }
    }

    fn downloader(fetcher: &Arc<ScriptedFetcher>, attempts: u32) -> Downloader {
        Downloader::new(
            Arc::clone(fetcher) as Arc<dyn FileFetcher>,
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::immediate(attempts),
        )
    }

    fn file1() -> Descriptor {
        Descriptor::new("f1", "a.ext", "u1", 100)
    }

    #[tokio::test]
    async fn test_save_file_success_returns_declared_size() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::succeeding());
        let dl = downloader(&fetcher, 3);

        let n = dl
            .save_file(&CancellationToken::new(), tmp.path(), &file1())
            .await
            .unwrap();

        assert_eq!(n, 100);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.urls.lock().unwrap().as_slice(), ["u1"]);
        let saved = tmp.path().join("f1-a.ext");
        assert_eq!(std::fs::read(saved).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_save_file_retries_up_to_max_attempts() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::always_failing(|| FetchError::other("rekt")));
        let dl = downloader(&fetcher, 3);

        let result = dl
            .save_file(&CancellationToken::new(), tmp.path(), &file1())
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::RemoteFetchFailed { attempts: 3, .. })
        ));
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_save_file_permanent_error_not_retried() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::always_failing(|| {
            FetchError::http_status("u1", 404)
        }));
        let dl = downloader(&fetcher, 5);

        let result = dl
            .save_file(&CancellationToken::new(), tmp.path(), &file1())
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::RemoteFetchFailed { attempts: 1, .. })
        ));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_save_file_recovers_and_truncates_partial_data() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::failing_then_ok(2, || {
            FetchError::http_status("u1", 503)
        }));
        let dl = downloader(&fetcher, 3);

        let n = dl
            .save_file(&CancellationToken::new(), tmp.path(), &file1())
            .await
            .unwrap();

        assert_eq!(n, 100);
        assert_eq!(fetcher.calls(), 3);
        let saved = std::fs::read(tmp.path().join("f1-a.ext")).unwrap();
        assert_eq!(saved, b"payload");
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_file_honours_retry_after() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::failing_then_ok(1, || {
            FetchError::http_status_with_retry_after("u1", 429, Some(Duration::from_secs(5)))
        }));
        let dl = downloader(&fetcher, 2);
        let start = tokio::time::Instant::now();

        dl.save_file(&CancellationToken::new(), tmp.path(), &file1())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_save_file_empty_directory_is_invalid_argument() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding());
        let dl = downloader(&fetcher, 3);

        let result = dl
            .save_file(&CancellationToken::new(), Path::new(""), &file1())
            .await;

        assert!(matches!(result, Err(DownloadError::InvalidArgument { .. })));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_save_file_creates_nested_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("C01").join("attachments");
        let fetcher = Arc::new(ScriptedFetcher::succeeding());
        let dl = downloader(&fetcher, 1);

        dl.save_file(&CancellationToken::new(), &dir, &file1())
            .await
            .unwrap();

        assert!(dir.join("f1-a.ext").is_file());
    }

    #[tokio::test]
    async fn test_save_file_cancelled_before_fetch() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::succeeding());
        let dl = downloader(&fetcher, 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = dl.save_file(&cancel, tmp.path(), &file1()).await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_dir_cases() {
        let tmp = TempDir::new().unwrap();
        let existing_file = tmp.path().join("existing_file");
        std::fs::write(&existing_file, b"I should not be moved").unwrap();

        assert!(matches!(
            ensure_dir(Path::new("")).await,
            Err(DownloadError::InvalidArgument { .. })
        ));
        ensure_dir(&tmp.path().join("test1")).await.unwrap();
        // already exists
        ensure_dir(&tmp.path().join("test1")).await.unwrap();
        ensure_dir(&tmp.path().join("test2")).await.unwrap();
        assert!(matches!(
            ensure_dir(&existing_file).await,
            Err(DownloadError::NotADirectory { .. })
        ));
        assert_eq!(
            std::fs::read(&existing_file).unwrap(),
            b"I should not be moved"
        );
    }
}
