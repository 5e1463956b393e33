//! Downloader configuration.
//!
//! All values have defaults; a config file only needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, RetryPolicy};

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
const MAX_WORKERS: usize = 100;

/// Maximum allowed attempts per file.
const MAX_RETRIES: u32 = 10;

/// Default number of concurrent download workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default pace of remote calls, in calls per second.
pub const DEFAULT_RATE_LIMIT: f64 = 20.0;

/// Default token-bucket capacity.
pub const DEFAULT_BURST: u32 = 1;

/// Default work queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 20;

/// Backoff multiplier between attempts.
const BACKOFF_MULTIPLIER: f32 = 2.0;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Worker count outside the allowed range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// Retry count outside the allowed range.
    #[error("invalid retry count {value}: must be between 1 and {MAX_RETRIES}")]
    InvalidRetries {
        /// The rejected value.
        value: u32,
    },

    /// Negative or non-finite rate.
    #[error("invalid rate limit {value}: must be a finite number >= 0")]
    InvalidRateLimit {
        /// The rejected value.
        value: f64,
    },

    /// Zero-capacity queue.
    #[error("invalid queue size 0: must be at least 1")]
    InvalidQueueSize,

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this struct.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the config file.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Constructor-time settings for a [`DownloadManager`](crate::DownloadManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloaderConfig {
    /// Number of concurrent workers (1-100).
    pub workers: usize,
    /// Maximum fetch attempts per file, including the first (1-10).
    pub retries: u32,
    /// Remote calls per second; 0 disables pacing.
    pub rate_limit: f64,
    /// Token-bucket capacity.
    pub burst: u32,
    /// Work queue capacity.
    pub queue_size: usize,
    /// First backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for DownloaderConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_MAX_RETRIES,
            rate_limit: DEFAULT_RATE_LIMIT,
            burst: DEFAULT_BURST,
            queue_size: DEFAULT_QUEUE_SIZE,
            backoff_base_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            backoff_max_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl DownloaderConfig {
    /// Loads a JSON config file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] on failure,
    /// or a validation error for out-of-range values.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkers {
                value: self.workers,
            });
        }
        if !(1..=MAX_RETRIES).contains(&self.retries) {
            return Err(ConfigError::InvalidRetries {
                value: self.retries,
            });
        }
        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(ConfigError::InvalidRateLimit {
                value: self.rate_limit,
            });
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }
        Ok(())
    }

    /// Retry policy described by this config.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
            BACKOFF_MULTIPLIER,
        )
    }
}
