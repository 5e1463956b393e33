//! Completion signalling for batches fed from a still-producing stream.
//!
//! Closing the work queue says nothing about whether the workers are done
//! with what was already queued, and a shared pool's queue is never closed
//! by a batch at all. A [`CompletionBarrier`] instead counts requests as they
//! are dispatched and as they finish; once the producer has sealed it and the
//! two counts meet, the batch is complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::DownloadError;

/// Dispatched/completed counter pair plus outcome statistics for one batch.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    bytes: AtomicU64,
    sealed: AtomicBool,
    notify: Notify,
}

impl CompletionBarrier {
    /// Creates an empty, unsealed barrier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that one more request was handed to the pool.
    pub fn dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    /// Records the outcome of one dispatched request.
    pub fn complete(&self, outcome: &Result<u64, DownloadError>) {
        match outcome {
            Ok(bytes) => {
                self.bytes.fetch_add(*bytes, Ordering::SeqCst);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Marks the input as exhausted: no more `dispatch` calls will follow.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// True once sealed and every dispatched request has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
            && self.completed.load(Ordering::SeqCst) >= self.dispatched.load(Ordering::SeqCst)
    }

    /// Waits until [`is_done`](Self::is_done).
    pub async fn wait(&self) {
        loop {
            // Register before checking so a wake-up between the check and
            // the await is not lost.
            let notified = self.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        BatchSummary {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            succeeded: completed.saturating_sub(failed),
            failed,
            bytes: self.bytes.load(Ordering::SeqCst),
            cancelled: false,
        }
    }
}

/// Outcome counts of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Requests handed to the pool after deduplication.
    pub dispatched: usize,
    /// Requests saved successfully.
    pub succeeded: usize,
    /// Requests that failed (logged by the worker).
    pub failed: usize,
    /// Sum of declared sizes of saved files.
    pub bytes: u64,
    /// True if the batch was cut short by cancellation.
    pub cancelled: bool,
}

impl BatchSummary {
    /// Number of requests that finished, successfully or not.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Handle returned by a batch download; resolves when the batch is done.
#[derive(Debug)]
pub struct Completion {
    barrier: Arc<CompletionBarrier>,
    cancel: CancellationToken,
}

impl Completion {
    pub(crate) fn new(barrier: Arc<CompletionBarrier>, cancel: CancellationToken) -> Self {
        Self { barrier, cancel }
    }

    /// True once every dispatched request has been processed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.barrier.is_done()
    }

    /// Waits for the batch to finish and returns its summary.
    ///
    /// If the batch's cancellation token fires first, returns immediately
    /// with `cancelled` set; requests still queued at that point are never
    /// processed.
    pub async fn wait(self) -> BatchSummary {
        tokio::select! {
            biased;
            () = self.barrier.wait() => self.barrier.summary(),
            () = self.cancel.cancelled() => BatchSummary {
                cancelled: !self.barrier.is_done(),
                ..self.barrier.summary()
            },
        }
    }
}
