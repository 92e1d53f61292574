use std::sync::Arc;
use std::time::Duration;

use super::executor::CallAttempt;

/// Consumes circuit breaker and executor events. May used for metrics and/or logs.
pub trait Instrument: Send + Sync {
    /// Calls when the circuit breaker rejects a call.
    fn on_call_rejected(&self, name: &str);

    /// Calls when the circuit breaker becomes open after `failures` counted failures.
    fn on_open(&self, name: &str, failures: u32, recovery_timeout: &Duration);

    /// Calls when the circuit breaker becomes half open and grants a trial call.
    fn on_half_open(&self, name: &str);

    /// Calls when the circuit breaker becomes closed.
    fn on_closed(&self, name: &str);

    /// Calls by the executor after every attempt, including rejected ones.
    fn on_attempt(&self, _name: &str, _attempt: &CallAttempt) {}
}

impl<T> Instrument for Arc<T>
where
    T: Instrument + ?Sized,
{
    fn on_call_rejected(&self, name: &str) {
        (**self).on_call_rejected(name)
    }

    fn on_open(&self, name: &str, failures: u32, recovery_timeout: &Duration) {
        (**self).on_open(name, failures, recovery_timeout)
    }

    fn on_half_open(&self, name: &str) {
        (**self).on_half_open(name)
    }

    fn on_closed(&self, name: &str) {
        (**self).on_closed(name)
    }

    fn on_attempt(&self, name: &str, attempt: &CallAttempt) {
        (**self).on_attempt(name, attempt)
    }
}

/// An instrumentation which does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrument;

impl Instrument for NoopInstrument {
    fn on_call_rejected(&self, _: &str) {}

    fn on_open(&self, _: &str, _: u32, _: &Duration) {}

    fn on_half_open(&self, _: &str) {}

    fn on_closed(&self, _: &str) {}
}

/// Reports state transitions and attempts as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInstrument;

impl Instrument for LogInstrument {
    fn on_call_rejected(&self, name: &str) {
        tracing::debug!(dependency = name, "call rejected by open circuit");
    }

    fn on_open(&self, name: &str, failures: u32, recovery_timeout: &Duration) {
        tracing::info!(
            dependency = name,
            failures,
            recovery_timeout_ms = recovery_timeout.as_millis() as u64,
            state = "open",
            "circuit opened"
        );
    }

    fn on_half_open(&self, name: &str) {
        tracing::info!(
            dependency = name,
            state = "half_open",
            "circuit half open, trial call granted"
        );
    }

    fn on_closed(&self, name: &str) {
        tracing::info!(dependency = name, state = "closed", "circuit closed");
    }

    fn on_attempt(&self, name: &str, attempt: &CallAttempt) {
        tracing::debug!(
            dependency = name,
            attempt = attempt.number,
            outcome = attempt.outcome.as_str(),
            elapsed_ms = attempt.elapsed.as_millis() as u64,
            "attempt finished"
        );
    }
}
