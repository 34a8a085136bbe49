//! Fetch retry with exponential backoff.
//!
//! The delay schedule is a pure function of the attempt index and the wait
//! itself goes through [`Sleeper`], so the whole loop is testable without
//! real timers. Waits race a [`CancellationToken`] so `stop()` takes effect
//! between attempts.

use crate::tracker::FetchError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first try included. Never below one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the failed attempt with index `attempt` (0-based):
    /// `base_delay * 2^attempt`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(Duration::MAX)
    }
}

/// Abstraction over waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real timer backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a retried fetch gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Retries exhausted, or a permanent error ended them early.
    Failed { attempts: u32, error: FetchError },
    /// The cancel token fired while waiting between attempts.
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts, or
/// `cancel` fires between attempts.
///
/// `op` receives the 0-based attempt index. An in-flight attempt is never
/// interrupted; cancellation is only observed while waiting.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancellationToken,
    item_id: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_retryable() => {
                warn!(item_id, attempt, "permanent fetch failure: {}", error.message());
                return Err(RetryError::Failed {
                    attempts: attempt + 1,
                    error,
                });
            }
            Err(error) => {
                let attempts = attempt + 1;
                if attempts >= policy.max_attempts {
                    warn!(item_id, attempts, "fetch retries exhausted: {}", error.message());
                    return Err(RetryError::Failed { attempts, error });
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    item_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient fetch failure, backing off: {}",
                    error.message()
                );

                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled { attempts });
                }
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled { attempts });
                    }
                    _ = sleeper.sleep(delay) => {}
                }
                attempt = attempts;
            }
        }
    }
}
