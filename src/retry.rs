//! Backoff policy for rate-limited spreadsheet calls.
//!
//! Uses `backon` for exponential backoff with jitter. Only
//! [`SheetsError::RateLimited`] is retried; every other failure is final.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::error::SheetsError;

/// Backoff settings for spreadsheet calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    /// - Min delay: 500ms
    /// - Max delay: 8s
    /// - Max retries: 5
    fn default() -> Self {
        RetryPolicy {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Near-zero delays, for tests.
    pub fn immediate(max_retries: usize) -> Self {
        RetryPolicy {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_retries,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}

/// Whether a failed call should be attempted again.
pub fn is_retryable(err: &SheetsError) -> bool {
    err.is_rate_limited()
}
