// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded retries with fixed or exponential backoff.
//!
//! Retries live inside a stage (the feed locator uses them); the pipeline
//! itself never retries a failed stage.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FeedError;

/// Errors that can be classified as transient
pub trait IsRetryable {
    /// Returns true if the operation should be attempted again
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FeedError {
    fn is_retryable(&self) -> bool {
        match self {
            FeedError::FetchFailed { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            FeedError::HttpStatus { .. } if self.is_not_found() => false,
            FeedError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            FeedError::ParseFailed { .. } | FeedError::Empty { .. } | FeedError::InvalidUrl(_) => {
                false
            }
        }
    }
}

/// How often and how patiently an operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "crate::config::secs")]
    pub initial_delay: Duration,
    /// Factor applied to the delay after each retry; 1.0 gives a fixed backoff
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Same delay between every attempt
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// `2^attempt` seconds between attempts (1s, 2s, 4s, ...)
    pub const fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay to wait after the given zero-based failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                let delay = policy.delay_after(attempt);
                attempt += 1;

                warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
