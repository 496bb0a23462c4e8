//! Backoff policy and the retry loop that supervises actualizers.
//!
//! The loop knows nothing about actualizers: it re-runs an operation until the
//! operation returns `Ok` or the cancellation token fires, sleeping between
//! attempts according to a [`RetryPolicy`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// initial * 2^(attempt - 1), capped
    #[default]
    Exponential,
}

/// Delay policy for restarting a failed actualizer.
///
/// There is no attempt limit: actualizers retry until their context is
/// cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(180),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff between `initial_delay` and `max_delay`.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Constant delay, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (1-indexed). Never above `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => initial_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (initial_ms * exp).min(max_ms)
            }
        };

        // Deterministic spread so restarts of many actualizers do not line up.
        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).clamp(0.0, max_ms) as u64)
    }
}

/// Run `operation` until it succeeds or `cancel` fires.
///
/// Every failure is passed to `on_error` together with the attempt number, then
/// the loop sleeps for the policy's delay. Cancellation interrupts the sleep.
/// Returns the number of attempts that were started.
pub async fn retry_until_cancelled<F, Fut, E>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut operation: F,
    mut on_error: impl FnMut(u32, &E),
) -> u32
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return attempt;
        }
        attempt += 1;

        match operation().await {
            Ok(()) => return attempt,
            Err(err) => on_error(attempt, &err),
        }

        tokio::select! {
            _ = cancel.cancelled() => return attempt,
            _ = tokio::time::sleep(policy.delay_for_attempt(attempt)) => {}
        }
    }
}
