//! Bounded retry and polling policies.
//!
//! A [`RetryPolicy`] caps both the number of attempts and, optionally, the
//! total time spent waiting. Delays grow exponentially from a base delay up
//! to a ceiling. The same policy drives transient API retries and state
//! polling for instances.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::warn;

use crate::backend::TransientError;

/// Exponential backoff schedule with attempt and time limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    time_budget: Option<Duration>,
}

impl RetryPolicy {
    /// Creates an exponential policy starting at `base_delay`.
    ///
    /// `max_attempts` is clamped to at least one.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            base_delay,
            max_delay: base_delay,
            time_budget: None,
        }
    }

    /// Policy that retries up to `max_attempts` times without sleeping.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::exponential(max_attempts, Duration::ZERO)
    }

    /// Caps individual delays at `max_delay`.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Stops retrying once `budget` has elapsed since the first attempt.
    #[must_use]
    pub const fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Maximum number of attempts allowed by the policy.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Starts tracking attempts from now.
    #[must_use]
    pub fn handle(&self) -> RetryHandle {
        RetryHandle {
            policy: *self,
            attempts: 1,
            deadline: self
                .time_budget
                .and_then(|budget| Instant::now().checked_add(budget)),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1_u32.checked_shl(shift).unwrap_or(u32::MAX);
        let raw = self.base_delay.saturating_mul(factor);
        raw.min(self.max_delay.max(self.base_delay))
    }
}

/// Tracks progress through a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct RetryHandle {
    policy: RetryPolicy,
    attempts: u32,
    deadline: Option<Instant>,
}

impl RetryHandle {
    /// Returns the delay before the next attempt, or `None` when the policy
    /// is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempts);
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            match now.checked_add(delay) {
                Some(next) if next <= deadline => {}
                _ => return None,
            }
        }
        self.attempts += 1;
        Some(delay)
    }

    /// Number of attempts started so far, including the first.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the
/// policy is exhausted.
///
/// # Errors
///
/// Returns the last error produced by `call`.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    E: TransientError + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut handle = policy.handle();
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                let Some(delay) = handle.next_delay() else {
                    return Err(err);
                };
                warn!(
                    operation,
                    attempt = handle.attempts(),
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "transient cloud error, retrying"
                );
                sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
