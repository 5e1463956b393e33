//! Fixed-size pool of download workers draining one queue.
//!
//! Workers share the queue receiver behind a mutex and the downloader (and
//! so its rate limiter) behind an `Arc`; nothing else is shared. A worker
//! never fails: per-file errors are logged and, for batch requests, counted
//! on the batch's [`CompletionBarrier`].

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::completion::CompletionBarrier;
use super::executor::Downloader;
use super::{DownloadError, Request};

/// One unit of queued work.
///
/// A batch job that is dropped without being processed (its worker was
/// cancelled, or the queue closed under it) settles its batch as cancelled,
/// so the batch's completion never waits on work that will not happen.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) request: Request,
    /// Batch this request belongs to, if any. Taken once settled.
    barrier: Option<Arc<CompletionBarrier>>,
}

impl Job {
    pub(crate) fn single(request: Request) -> Self {
        Self {
            request,
            barrier: None,
        }
    }

    pub(crate) fn in_batch(request: Request, barrier: Arc<CompletionBarrier>) -> Self {
        Self {
            request,
            barrier: Some(barrier),
        }
    }

    /// Records the outcome on the job's batch, if it has one.
    pub(crate) fn finish(mut self, outcome: &Result<u64, DownloadError>) {
        if let Some(barrier) = self.barrier.take() {
            barrier.complete(outcome);
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(barrier) = self.barrier.take() {
            debug!(
                file = %self.request.descriptor.filename(),
                "batch request dropped before processing"
            );
            barrier.complete(&Err(DownloadError::Cancelled));
        }
    }
}

/// Receiving half of the work queue, shared by all workers of a pool.
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// Spawns `count` workers consuming `queue` until it closes or `cancel` fires.
pub(crate) fn spawn_workers(
    count: usize,
    downloader: &Arc<Downloader>,
    cancel: &CancellationToken,
    queue: mpsc::Receiver<Job>,
) -> Vec<JoinHandle<()>> {
    let queue: SharedQueue = Arc::new(Mutex::new(queue));
    (0..count)
        .map(|worker_id| {
            tokio::spawn(worker(
                worker_id,
                Arc::clone(downloader),
                cancel.clone(),
                Arc::clone(&queue),
            ))
        })
        .collect()
}

/// Waits for every worker to exit. Panics are logged, not propagated.
pub(crate) async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "download worker panicked");
        }
    }
}

/// Worker loop: cancellation wins over pending work; a closed, empty queue ends it.
#[instrument(skip(downloader, cancel, queue))]
pub(crate) async fn worker(
    worker_id: usize,
    downloader: Arc<Downloader>,
    cancel: CancellationToken,
    queue: SharedQueue,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("cancelled, exiting");
                return;
            }
            job = async { queue.lock().await.recv().await } => job,
        };

        let Some(job) = next else {
            debug!("queue closed, exiting");
            return;
        };

        let request = &job.request;
        let outcome = downloader
            .save_file(&cancel, &request.directory, &request.descriptor)
            .await;

        match &outcome {
            Ok(bytes) => info!(
                file = %request.descriptor.filename(),
                dir = %request.directory.display(),
                bytes,
                "downloaded"
            ),
            Err(e) => warn!(
                file = %request.descriptor.filename(),
                dir = %request.directory.display(),
                error = %e,
                "download failed"
            ),
        }

        job.finish(&outcome);
    }
}
