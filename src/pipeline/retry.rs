//! Retry combinator with pluggable backoff.
//!
//! One policy object covers both transport failures and unusable responses:
//! the operation passed to [`RetryPolicy::run_if`] performs the call *and* the
//! parse, so either kind of failure consumes an attempt.

use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Retry `n` waits `n * base`.
    Linear(Duration),
    /// Retry `n` waits `base * 2^(n-1)`.
    Exponential(Duration),
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(base) => base,
            Backoff::Linear(base) => base.saturating_mul(retry),
            Backoff::Exponential(base) => base.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub backoff: Backoff,
}

/// Final value of a retried operation plus how many retries it consumed.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Linear(base),
        }
    }

    /// Retry every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Retried<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(label, |_| true, op).await
    }

    /// Run `op(attempt)` until it succeeds, returns an error `retryable`
    /// rejects, or `max_retries` retries have been spent.
    pub async fn run_if<T, E, R, F, Fut>(&self, label: &str, retryable: R, mut op: F) -> Retried<T, E>
    where
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label,
                    attempt,
                    self.max_retries,
                    delay.as_millis()
                );
                sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        retries: attempt,
                    }
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                    if attempt >= self.max_retries || !retryable(&e) {
                        return Retried {
                            result: Err(e),
                            retries: attempt,
                        };
                    }
                }
            }
            attempt += 1;
        }
    }
}
