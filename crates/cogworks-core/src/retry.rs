use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// Source of delays, so backoff schedules can be checked without waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after failed attempt `n` (1-based) before attempt `n + 1`.
    pub backoff: fn(u32) -> Duration,
}

impl RetryPolicy {
    /// `attempt²` seconds between attempts.
    pub fn quadratic(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: |attempt| Duration::from_secs(u64::from(attempt) * u64::from(attempt)),
        }
    }

    pub fn single() -> Self {
        Self { max_attempts: 1, backoff: |_| Duration::ZERO }
    }
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed.
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryExhausted { attempts: attempt, last_error: e });
            }
            Err(e) => {
                let delay = (policy.backoff)(attempt);
                warn!(attempt, max_attempts, delay_secs = delay.as_secs_f64(), "attempt failed: {e}");
                sleeper.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
