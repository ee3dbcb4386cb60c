//! Capped-exponential backoff policy for retry scheduling.

use std::time::Duration;

/// Largest attempt number that still grows the exponent.
///
/// Beyond this the raw delay would overflow usefulness anyway; clamping keeps
/// the arithmetic bounded for jobs with large retry budgets.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Default base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default upper bound on any retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Pure mapping from attempt number to retry delay.
///
/// `delay(n) = min(max, base * 2^(n-1))` with the exponent clamped, yielding
/// 100ms, 200ms, 400ms, ... capped at 30s under the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// Create a policy with explicit base and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry following `attempt` (1-indexed).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.clamp(1, MAX_BACKOFF_EXPONENT) - 1;
        let raw = self.base.saturating_mul(1u32 << exponent);
        raw.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
