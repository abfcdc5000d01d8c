//! Retry with exponential backoff.
//!
//! The attempt budget lives in an atomic so a session being torn down can
//! tighten it while other requests are still retrying.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed, the first included. `None` is unlimited.
    pub max_tries: Option<usize>,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any single delay.
    pub max_delay: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub max_time: Option<Duration>,
    /// Draw each delay uniformly from zero to the computed backoff.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_time: None,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_tries(mut self, max_tries: Option<usize>) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

// Zero encodes "unlimited".
fn encode_tries(max_tries: Option<usize>) -> usize {
    max_tries.map(|n| n.max(1)).unwrap_or(0)
}

/// Runs an operation under a [`RetryConfig`].
#[derive(Debug)]
pub struct RetryInvoker {
    config: RetryConfig,
    max_tries: AtomicUsize,
}

impl RetryInvoker {
    pub fn new(config: RetryConfig) -> Self {
        let max_tries = AtomicUsize::new(encode_tries(config.max_tries));
        Self { config, max_tries }
    }

    /// Current attempt budget.
    pub fn max_tries(&self) -> Option<usize> {
        match self.max_tries.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }

    /// Replace the attempt budget. Takes effect for retries already running.
    pub fn set_max_tries(&self, max_tries: Option<usize>) {
        self.max_tries.store(encode_tries(max_tries), Ordering::SeqCst);
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let backoff = self
            .config
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);

        if self.config.jitter && !backoff.is_zero() {
            let millis = backoff.as_millis().min(u128::from(u64::MAX)) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            backoff
        }
    }

    /// Run `op` until it succeeds or the budget is spent.
    ///
    /// The last error is returned when giving up.
    pub async fn invoke<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let mut attempt: usize = 1;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if matches!(self.max_tries(), Some(max) if attempt >= max) {
                tracing::debug!(attempt, error = %err, "giving up after last attempt");
                return Err(err);
            }

            let delay = self.delay_for(attempt.min(u32::MAX as usize) as u32);
            if let Some(max_time) = self.config.max_time {
                if started.elapsed() + delay > max_time {
                    tracing::debug!(attempt, error = %err, "giving up, retry time exhausted");
                    return Err(err);
                }
            }

            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryInvoker {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
