//! Delay between ticks after failed uploads.
//!
//! The loop never gives up; failures only stretch the pause before the next
//! tick, doubling up to a ceiling.

use crate::config::Configuration;
use crate::error::{ErrorType, UploadError};
use std::time::Duration;

/// Exponential backoff between `interval` and `max_backoff`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::from_config(&Configuration::default())
    }
}

impl RetryStrategy {
    pub fn new(interval: Duration, max_backoff: Duration) -> Self {
        Self {
            interval,
            max_backoff: max_backoff.max(interval),
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.interval(), config.max_backoff())
    }

    /// `interval * 2^failures`, capped at `max_backoff`
    pub fn calculate_backoff(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(consecutive_failures).unwrap_or(u32::MAX);
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Whether `error` should stretch the next pause.
///
/// Cluster identity that is not available yet is expected at startup and keeps
/// the normal cadence.
pub fn counts_as_failure(error: &UploadError) -> bool {
    error.classify() != ErrorType::Pending
}
