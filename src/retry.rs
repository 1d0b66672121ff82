//! Transport-level retry with exponential backoff
//!
//! Only the blocking calls of a run (source fetch and index write) go through
//! here. A failure that survives its retries fails the whole run; the next
//! scheduled run resumes from the last committed save point.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry policy configuration (`[retry]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first try
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub initial_delay: Duration,

    /// Maximum retry delay
    #[serde(with = "humantime_serde", default = "default_max_retry_delay")]
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_retry_delay(),
            max_delay: default_max_retry_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let cap = self.max_delay.as_secs_f64();
        let secs = (self.initial_delay.as_secs_f64() * factor).min(cap);
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }
}

/// Errors that know whether they are transient
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::source::SourceError {
    fn is_retryable(&self) -> bool {
        crate::source::SourceError::is_retryable(self)
    }
}

impl Retryable for crate::index::IndexError {
    fn is_retryable(&self) -> bool {
        crate::index::IndexError::is_retryable(self)
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    description: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "Retrying {description} after {delay:?} (attempt {attempt}/{}): {err}",
                    policy.max_retries
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_retry_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
