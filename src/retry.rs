//! Bounded retry with exponential backoff.
//!
//! One retry loop serves both call styles. The caller picks how to wait
//! between attempts: [`TokioSleep`] suspends the task, [`ThreadSleep`] parks
//! the current (worker) thread.
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Errors that can tell whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// How the retry loop waits between attempts.
pub trait Wait: Sync {
    fn wait(&self, delay: Duration) -> impl Future<Output = ()> + Send;
}

/// Cooperative wait for callers running on the async scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl Wait for TokioSleep {
    fn wait(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(delay)
    }
}

/// Thread-blocking wait for callers already running on a worker thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Wait for ThreadSleep {
    fn wait(&self, delay: Duration) -> impl Future<Output = ()> + Send {
        std::thread::sleep(delay);
        std::future::ready(())
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Retry settings. `max_retries` is the total number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay after the `failures`-th failed attempt: `base * 2^(failures - 1)`.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base_delay().saturating_mul(1u32 << exp)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned as-is.
    pub async fn run<T, E, F, Fut, W>(&self, label: &str, waiter: &W, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
        W: Wait,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts || !e.is_transient() => return Err(e),
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{label} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}"
                    );
                    waiter.wait(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Blocking form of [`run`](Self::run) for code on a worker thread.
    pub fn run_blocking<T, E, F>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Transient + Display,
    {
        futures::executor::block_on(self.run(label, &ThreadSleep, |attempt| {
            std::future::ready(operation(attempt))
        }))
    }
}
