//! Delay computation between retry attempts.
//!
//! The delay grows geometrically from `base` by `multiplier` on every attempt
//! and is capped by `max`. An optional jitter perturbs each delay by a uniform
//! random fraction of itself so that many callers failing at once don't retry
//! in lockstep.

use std::time::Duration;

use rand::Rng;

/// An exponential backoff with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Backoff {
    /// Creates a backoff without jitter.
    ///
    /// Arguments aren't validated here, `RetryPolicy::builder` does that.
    pub(crate) fn new(base: Duration, max: Duration, multiplier: f64, jitter: f64) -> Self {
        Backoff {
            base,
            max,
            multiplier,
            jitter,
        }
    }

    /// The delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base
    }

    /// The upper bound of any delay.
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// The growth factor between consecutive delays.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// The jitter fraction in `[0, 1)`.
    pub fn jitter_fraction(&self) -> f64 {
        self.jitter
    }

    /// Returns the delay to wait after the failed attempt `attempt` (1-based).
    ///
    /// Uses the thread local RNG for jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_for_with(attempt, &mut rand::thread_rng())
    }

    /// Same as `delay_for` but draws the jitter from the given RNG.
    pub fn delay_for_with<R>(&self, attempt: u32, rng: &mut R) -> Duration
    where
        R: Rng + ?Sized,
    {
        let delay = self.capped(attempt);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let range = delay.as_secs_f64() * self.jitter;
        let offset = rng.gen_range(-range..=range);
        let secs = (delay.as_secs_f64() + offset).max(0.0);

        Duration::try_from_secs_f64(secs).map_or(self.max, |delay| delay.min(self.max))
    }

    /// `min(base * multiplier^(attempt-1), max)` without jitter.
    fn capped(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exp);

        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}
