//! Exponential backoff with a ceiling.
//!
//! Shared by the reconnect loop and the message bus retry queue so both
//! follow one delay curve.

use std::time::Duration;

/// Default growth factor between consecutive attempts.
pub const DEFAULT_FACTOR: u32 = 2;

/// Exponential backoff policy.
///
/// `delay(n) = min(base * factor^(n-1), max)` for attempt `n >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: u32,
}

impl Backoff {
    /// Create a doubling backoff starting at `base` and capped at `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            factor: DEFAULT_FACTOR,
        }
    }

    /// Override the growth factor (1 gives a constant delay).
    #[must_use]
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    /// Delay to wait after the given failed attempt.
    ///
    /// Attempt `0` means nothing has failed yet and yields no delay.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = self.factor.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.max)
    }

    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
