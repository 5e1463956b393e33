//! Download lifecycle: start/stop a worker pool, enqueue files, run batches.
//!
//! A [`DownloadManager`] is either stopped or running. Starting allocates a
//! bounded work queue and spawns the workers; stopping closes the queue and
//! waits for the workers to drain it. The same manager can be started and
//! stopped any number of times, and separate managers are independent.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use attachment_downloader::{Descriptor, DownloadManager, DownloaderConfig, HttpFetcher};
//! use futures_util::stream;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Arc::new(HttpFetcher::new()?.with_bearer_token("xoxp-..."));
//! let manager = DownloadManager::new(fetcher, &DownloaderConfig::default())?;
//! let cancel = CancellationToken::new();
//!
//! // Long-lived mode: other code pushes files while discovery runs.
//! manager.start(cancel.clone()).await;
//! manager
//!     .enqueue("export/C01", Descriptor::new("F1", "a.png", "https://files.test/F1", 10))
//!     .await?;
//! manager.stop().await;
//!
//! // Batch mode: a stream of descriptors and a completion handle.
//! let files = stream::iter(vec![Descriptor::new("F2", "b.pdf", "https://files.test/F2", 20)]);
//! let summary = manager.download_all(cancel, "export/C02", files).await?.wait().await;
//! println!("saved {} files", summary.succeeded);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::completion::{Completion, CompletionBarrier};
use super::executor::Downloader;
use super::fetcher::FileFetcher;
use super::filter::filter_seen;
use super::pool::{Job, join_workers, spawn_workers};
use super::rate_limiter::RateLimiter;
use super::{Descriptor, DownloadError, Request};
use crate::config::{ConfigError, DownloaderConfig};

/// Per-instance session state. There is no intermediate state: the queue
/// sender and the worker handles exist together or not at all.
#[derive(Debug)]
enum Session {
    Stopped,
    Running {
        queue: mpsc::Sender<Job>,
        workers: Vec<JoinHandle<()>>,
    },
}

/// Owns a worker pool and its work queue.
#[derive(Debug)]
pub struct DownloadManager {
    downloader: Arc<Downloader>,
    workers: usize,
    queue_size: usize,
    session: Mutex<Session>,
}

impl DownloadManager {
    /// Creates a stopped manager from a config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config does not validate.
    #[instrument(level = "debug", skip(fetcher))]
    pub fn new(
        fetcher: Arc<dyn FileFetcher>,
        config: &DownloaderConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit, config.burst));
        let downloader = Arc::new(Downloader::new(
            fetcher,
            rate_limiter,
            config.retry_policy(),
        ));
        Ok(Self::with_downloader(
            downloader,
            config.workers,
            config.queue_size,
        ))
    }

    /// Creates a stopped manager around an existing downloader.
    ///
    /// `workers` and `queue_size` are raised to at least 1.
    #[must_use]
    pub fn with_downloader(downloader: Arc<Downloader>, workers: usize, queue_size: usize) -> Self {
        Self {
            downloader,
            workers: workers.max(1),
            queue_size: queue_size.max(1),
            session: Mutex::new(Session::Stopped),
        }
    }

    /// Returns the downloader used by the workers.
    #[must_use]
    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub async fn is_running(&self) -> bool {
        matches!(*self.session.lock().await, Session::Running { .. })
    }

    /// Starts the worker pool. Does nothing if already running.
    ///
    /// Workers observe `cancel`: once it fires they stop taking work and
    /// exit, leaving anything still queued unprocessed. Queued batch
    /// requests are then counted as failed so their batches still settle.
    #[instrument(skip_all, fields(workers = self.workers, queue_size = self.queue_size))]
    pub async fn start(&self, cancel: CancellationToken) {
        let mut session = self.session.lock().await;
        if matches!(*session, Session::Running { .. }) {
            debug!("already started");
            return;
        }

        let (queue, receiver) = mpsc::channel(self.queue_size);
        let workers = spawn_workers(self.workers, &self.downloader, &cancel, receiver);
        *session = Session::Running { queue, workers };
        info!("download workers started");
    }

    /// Stops the worker pool. Does nothing if not running.
    ///
    /// Closes the queue and waits for the workers to finish what was already
    /// queued (or to exit early if their token was cancelled). A batch still
    /// feeding the shared pool keeps the queue open until its input ends.
    #[instrument(skip_all)]
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let Session::Running { queue, workers } =
            std::mem::replace(&mut *session, Session::Stopped)
        else {
            debug!("not running");
            return;
        };

        drop(queue);
        join_workers(workers).await;
        info!("download workers stopped");
    }

    /// Queues one file for download into `directory`.
    ///
    /// Returns once the request is on the queue; the download itself happens
    /// on a worker and its outcome is only logged. Waits for queue capacity
    /// when the pool is saturated.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::NotStarted`] if the manager is not running
    /// - [`DownloadError::QueueClosed`] if every worker has already exited
    #[instrument(skip(self, directory, descriptor), fields(file_id = %descriptor.id))]
    pub async fn enqueue(
        &self,
        directory: impl Into<PathBuf>,
        descriptor: Descriptor,
    ) -> Result<(), DownloadError> {
        let queue = self.running_queue().await.ok_or(DownloadError::NotStarted)?;
        queue
            .send(Job::single(Request::new(directory, descriptor)))
            .await
            .map_err(|_| DownloadError::QueueClosed)?;
        debug!("file queued");
        Ok(())
    }

    /// Downloads one file right now, bypassing the queue.
    ///
    /// Works whether or not the manager is running; still paced by the
    /// shared rate limiter.
    ///
    /// # Errors
    ///
    /// See [`Downloader::save_file`].
    pub async fn save_file(
        &self,
        cancel: &CancellationToken,
        directory: impl AsRef<Path>,
        descriptor: &Descriptor,
    ) -> Result<u64, DownloadError> {
        self.downloader
            .save_file(cancel, directory.as_ref(), descriptor)
            .await
    }

    /// Downloads every descriptor from `descriptors` into `directory`.
    ///
    /// Descriptors are tagged with `directory`, deduplicated by
    /// `(id, directory)`, and dispatched to the running pool if there is one,
    /// or else to a fresh pool that lives for this batch only. Returns
    /// immediately; the returned [`Completion`] resolves once the stream is
    /// exhausted and every dispatched request has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidArgument`] if `directory` is empty.
    #[instrument(skip(self, cancel, directory, descriptors), fields(dir = tracing::field::Empty))]
    pub async fn download_all<S>(
        &self,
        cancel: CancellationToken,
        directory: impl Into<PathBuf>,
        descriptors: S,
    ) -> Result<Completion, DownloadError>
    where
        S: Stream<Item = Descriptor> + Send + 'static,
    {
        let directory = directory.into();
        if directory.as_os_str().is_empty() {
            return Err(DownloadError::invalid_argument(
                "directory must not be empty",
            ));
        }
        tracing::Span::current().record("dir", directory.display().to_string());

        let (queue, fresh_workers) = match self.running_queue().await {
            Some(queue) => {
                debug!("dispatching batch to running pool");
                (queue, None)
            }
            None => {
                debug!(workers = self.workers, "starting pool for batch");
                let (queue, receiver) = mpsc::channel(self.queue_size);
                let workers = spawn_workers(self.workers, &self.downloader, &cancel, receiver);
                (queue, Some(workers))
            }
        };

        let barrier = Arc::new(CompletionBarrier::new());
        let requests =
            filter_seen(descriptors.map(move |descriptor| Request::new(directory.clone(), descriptor)));

        tokio::spawn(feed_batch(
            requests,
            queue,
            Arc::clone(&barrier),
            cancel.clone(),
            fresh_workers,
        ));

        Ok(Completion::new(barrier, cancel))
    }

    async fn running_queue(&self) -> Option<mpsc::Sender<Job>> {
        match &*self.session.lock().await {
            Session::Running { queue, .. } => Some(queue.clone()),
            Session::Stopped => None,
        }
    }
}

/// Moves deduplicated requests onto the queue, counting each on the barrier.
async fn feed_batch<S>(
    requests: S,
    queue: mpsc::Sender<Job>,
    barrier: Arc<CompletionBarrier>,
    cancel: CancellationToken,
    fresh_workers: Option<Vec<JoinHandle<()>>>,
) where
    S: Stream<Item = Request>,
{
    let mut requests = pin!(requests);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("batch cancelled, no further requests dispatched");
                break;
            }
            next = requests.next() => next,
        };
        let Some(request) = next else {
            break;
        };

        barrier.dispatch();
        let job = Job::in_batch(request, Arc::clone(&barrier));
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DownloadError::Cancelled),
            sent = queue.send(job) => sent.map_err(|_| DownloadError::QueueClosed),
        };
        // An undelivered job settles itself on the barrier when dropped.
        if let Err(e) = sent {
            warn!(error = %e, "request not dispatched");
        }
    }

    barrier.seal();
    drop(queue);

    let summary = barrier.summary();
    info!(dispatched = summary.dispatched, "batch input exhausted");

    if let Some(workers) = fresh_workers {
        join_workers(workers).await;
        let summary = barrier.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            bytes = summary.bytes,
            "batch complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::download::fetcher::Destination;
    use crate::download::{FetchError, RetryPolicy};

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FileFetcher for CountingFetcher {
        async fn fetch(&self, _url: &str, dest: Destination<'_>) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            dest.write_all(b"data").await?;
            Ok(())
        }
    }

    fn manager(fetcher: &Arc<CountingFetcher>) -> DownloadManager {
        let downloader = Arc::new(Downloader::new(
            Arc::clone(fetcher) as Arc<dyn FileFetcher>,
            Arc::new(RateLimiter::new(5000.0, 1)),
            RetryPolicy::immediate(3),
        ));
        DownloadManager::with_downloader(downloader, 4, 20)
    }

    #[tokio::test]
    async fn test_start_sets_running() {
        let m = manager(&Arc::new(CountingFetcher::default()));
        assert!(!m.is_running().await);

        m.start(CancellationToken::new()).await;
        assert!(m.is_running().await);
        match &*m.session.lock().await {
            Session::Running { workers, .. } => assert_eq!(workers.len(), 4),
            Session::Stopped => panic!("expected running session"),
        }

        m.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let m = manager(&Arc::new(CountingFetcher::default()));
        m.start(CancellationToken::new()).await;
        m.start(CancellationToken::new()).await;
        match &*m.session.lock().await {
            Session::Running { workers, .. } => assert_eq!(workers.len(), 4),
            Session::Stopped => panic!("expected running session"),
        }
        m.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_state() {
        let m = manager(&Arc::new(CountingFetcher::default()));
        m.start(CancellationToken::new()).await;
        m.stop().await;
        assert!(!m.is_running().await);
        assert!(matches!(*m.session.lock().await, Session::Stopped));
    }

    #[tokio::test]
    async fn test_stop_on_stopped_manager_does_nothing() {
        let m = manager(&Arc::new(CountingFetcher::default()));
        tokio::time::timeout(Duration::from_secs(1), async {
            m.stop().await;
            m.stop().await;
        })
        .await
        .unwrap();
        assert!(!m.is_running().await);
    }

    #[tokio::test]
    async fn test_enqueue_on_stopped_manager_fails() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&Arc::new(CountingFetcher::default()));
        let err = m
            .enqueue(tmp.path(), Descriptor::new("xx", "tt", "u", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NotStarted));
    }

    #[tokio::test]
    async fn test_enqueue_places_file_on_queue() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let m = manager(&fetcher);
        m.start(CancellationToken::new()).await;

        m.enqueue(tmp.path(), Descriptor::new("f1", "filename1.ext", "file1_url", 100))
            .await
            .unwrap();
        m.stop().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(tmp.path().join("f1-filename1.ext").is_file());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let m = manager(&fetcher);

        for round in 0..3 {
            m.start(CancellationToken::new()).await;
            m.enqueue(tmp.path(), Descriptor::new(format!("f{round}"), "x", "u", 1))
                .await
                .unwrap();
            m.stop().await;
            assert!(matches!(
                m.enqueue(tmp.path(), Descriptor::new("late", "x", "u", 1)).await,
                Err(DownloadError::NotStarted)
            ));
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_download_all_empty_directory_rejected() {
        let m = manager(&Arc::new(CountingFetcher::default()));
        let result = m
            .download_all(CancellationToken::new(), "", stream::iter(Vec::new()))
            .await;
        assert!(matches!(result, Err(DownloadError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_download_all_empty_stream_completes() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let m = manager(&fetcher);

        let completion = m
            .download_all(CancellationToken::new(), tmp.path(), stream::iter(Vec::new()))
            .await
            .unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(5), completion.wait())
            .await
            .unwrap();

        assert_eq!(summary.dispatched, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_all_deduplicates() {
        let tmp = TempDir::new().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let m = manager(&fetcher);
        let d = Descriptor::new("f1", "a.ext", "u1", 100);

        let summary = m
            .download_all(
                CancellationToken::new(),
                tmp.path(),
                stream::iter(vec![d.clone(), d.clone(), d]),
            )
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.bytes, 100);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
