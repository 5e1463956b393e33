//! Token-bucket rate limiting for remote fetch calls.
//!
//! This module provides the [`RateLimiter`] struct which paces every call to
//! the remote content service, independent of how many workers are active.
//!
//! # Overview
//!
//! The bucket holds up to `burst` tokens and refills at `rate` tokens per
//! second. Each fetch attempt takes one token. When the bucket is empty the
//! caller reserves the next token anyway (the balance goes negative) and
//! sleeps until its slot comes up, so concurrent waiters are served in the
//! order they arrived. A waiter that is cancelled hands its token back.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use attachment_downloader::download::RateLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), attachment_downloader::DownloadError> {
//! // 10 calls per second, no bursting
//! let limiter = Arc::new(RateLimiter::new(10.0, 1));
//! let cancel = CancellationToken::new();
//!
//! // First call proceeds immediately
//! limiter.acquire(&cancel).await?;
//!
//! // Second call waits ~100ms for the next token
//! limiter.acquire(&cancel).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::DownloadError;

/// Warning threshold for cumulative time spent waiting on the limiter.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Shared token-bucket limiter.
///
/// This struct is designed to be wrapped in `Arc` and shared across all
/// worker tasks. The bucket state lives behind a `tokio::sync::Mutex`; the
/// lock is only held to refill and reserve, never across the wait.
#[derive(Debug)]
pub struct RateLimiter {
    /// Tokens added per second.
    rate: f64,

    /// Bucket capacity.
    burst: u32,

    /// Whether rate limiting is disabled (rate of 0).
    disabled: bool,

    bucket: Mutex<Bucket>,

    /// Total time callers have been told to wait, in milliseconds.
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug)]
struct Bucket {
    /// Available tokens. Negative when callers have reserved future tokens.
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, burst: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Creates a limiter granting `rate` calls per second with `burst` capacity.
    ///
    /// A non-positive or non-finite `rate` yields a disabled limiter; `burst`
    /// is raised to at least 1.
    #[must_use]
    #[instrument(level = "debug")]
    pub fn new(rate: f64, burst: u32) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self::disabled();
        }
        let burst = burst.max(1);
        debug!("creating rate limiter");
        Self {
            rate,
            burst,
            disabled: false,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            rate: 0.0,
            burst: 1,
            disabled: true,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the refill rate in tokens per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Returns the bucket capacity.
    #[must_use]
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Takes one token, waiting until it is available.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Cancelled`] if `cancel` is triggered before
    /// or while waiting. A cancelled waiter returns its reserved token.
    #[instrument(level = "trace", skip_all)]
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if self.disabled {
            return Ok(());
        }

        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.refill(self.rate, f64::from(self.burst), Instant::now());
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                return Ok(());
            }
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        };

        let cumulative = self.add_cumulative_delay(wait);
        debug!(
            delay_ms = wait.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "waiting for rate limiter token"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
            && cumulative.saturating_sub(wait) < CUMULATIVE_DELAY_WARNING_THRESHOLD
        {
            warn!(
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive rate limiting - downloads are being paced heavily"
            );
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let mut bucket = self.bucket.lock().await;
                bucket.tokens = (bucket.tokens + 1.0).min(f64::from(self.burst));
                debug!("rate limiter wait cancelled");
                Err(DownloadError::Cancelled)
            }
            () = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}
