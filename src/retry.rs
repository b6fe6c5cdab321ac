use crate::models::JobStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Job-level retry policy.
///
/// Retries happen across batch runs, not inside one: a failed job goes back
/// to `PENDING_TRANSLATION` and is picked up by a later invocation until it
/// has failed `max_attempts` times.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failed attempts after which a job is marked `TRANSLATION_FAILED`
    pub max_attempts: u32,
    /// Delay before the first retry is eligible; zero disables backoff
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
}

/// What to write back after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry_count: i32,
    pub status: JobStatus,
    pub next_attempt_after: Option<DateTime<Utc>>,
}

impl RetryPolicy {
    /// Retry on the scheduler's cadence, with no backoff
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(60 * 60),
            backoff_multiplier: 2.0,
        }
    }

    /// Hold failed jobs back for `initial_delay`, growing per attempt
    pub fn with_backoff(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay after the given failed attempt (1-indexed)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Bookkeeping for a job that just failed with `previous_retry_count`
    /// earlier failures.
    pub fn on_failure(&self, previous_retry_count: i32, now: DateTime<Utc>) -> RetryDecision {
        let retry_count = previous_retry_count.max(0).saturating_add(1);

        if (retry_count as u32) >= self.max_attempts {
            return RetryDecision {
                retry_count,
                status: JobStatus::TranslationFailed,
                next_attempt_after: None,
            };
        }

        let delay = self.delay_for_attempt(retry_count as u32);
        let next_attempt_after = if delay.is_zero() {
            None
        } else {
            chrono::Duration::from_std(delay).ok().map(|d| now + d)
        };

        RetryDecision {
            retry_count,
            status: JobStatus::PendingTranslation,
            next_attempt_after,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
