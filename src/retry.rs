use std::time::Duration;

use super::backoff::Backoff;
use super::error::ConfigError;
use super::failure::Outcome;

/// How many times and how far apart a call is attempted.
///
/// Immutable once built, share it by reference or clone it freely.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Returns a policy builder with 3 attempts, 100ms base delay doubling up
    /// to 10s and no jitter.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy which makes exactly one attempt.
    pub fn never() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Backoff::new(Duration::ZERO, Duration::ZERO, 2.0, 0.0),
        }
    }

    /// The attempts budget, including the first attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The delay schedule.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Returns the delay to wait after the failed attempt `attempt` (1-based).
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }

    /// Decides whether another attempt follows the attempt `attempt` (1-based)
    /// which ended with `outcome`.
    ///
    /// Only retryable failures and timeouts are retried, and only while the
    /// attempts budget is not spent.
    #[inline]
    pub fn should_retry(&self, attempt: u32, outcome: Outcome) -> bool {
        attempt < self.max_attempts && outcome.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let builder = RetryPolicyBuilder::default();
        RetryPolicy {
            max_attempts: builder.max_attempts,
            backoff: Backoff::new(
                builder.base_delay,
                builder.max_delay,
                builder.multiplier,
                builder.jitter_fraction,
            ),
        }
    }
}

/// A `RetryPolicy` builder.
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_fraction: f64,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        RetryPolicyBuilder {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }
}

impl RetryPolicyBuilder {
    /// The attempts budget including the first attempt, must be at least 1.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The delay after the first failed attempt.
    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// The upper bound of any delay, must not be less than the base delay.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The growth factor between delays, must be greater than 1.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// The jitter fraction in `[0, 1)`.
    pub fn jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    /// Validates the options and builds the policy.
    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ConfigError::invalid(
                "multiplier",
                format!("must be a finite number greater than 1, got {}", self.multiplier),
            ));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::invalid(
                "jitter_fraction",
                format!("must be in [0, 1), got {}", self.jitter_fraction),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "base_delay",
                format!(
                    "{:?} is greater than max_delay {:?}",
                    self.base_delay, self.max_delay
                ),
            ));
        }

        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff::new(
                self.base_delay,
                self.max_delay,
                self.multiplier,
                self.jitter_fraction,
            ),
        })
    }
}
