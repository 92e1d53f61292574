//! The call executor: one logical call to a dependency, made of one or more
//! attempts.
//!
//! Every attempt asks the circuit breaker for permission, runs the operation
//! under a deadline, reports the outcome to the breaker and then either
//! returns or sleeps according to the retry policy. The breaker's lock is only
//! taken for the bookkeeping, never while the operation runs or while the
//! executor sleeps.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use failguard::{CircuitBreaker, Executor, Failure, RetryPolicy};
//!
//! # async fn fetch(_: &str) -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("inventory");
//! let policy = RetryPolicy::builder().max_attempts(3).build()?;
//! let executor = Executor::new(policy, Duration::from_secs(2))?;
//!
//! let body = executor
//!     .execute(&breaker, || async {
//!         fetch("/items/42").await.map_err(Failure::retryable)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use super::circuit_breaker::CircuitBreaker;
use super::error::{CallError, ConfigError};
use super::failure::{Failure, FailureKind, FailurePredicate, Outcome};
use super::retry::RetryPolicy;
use super::state_machine::Permit;

/// A record of a single attempt, handed to the breaker's `Instrument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallAttempt {
    /// The attempt number, starting at 1.
    pub number: u32,
    /// When the attempt started.
    pub started_at: Instant,
    /// How long the attempt took. Zero for rejected attempts.
    pub elapsed: Duration,
    /// How the attempt ended.
    pub outcome: Outcome,
}

/// Runs operations with retries, a per-attempt deadline and a circuit breaker.
#[derive(Debug, Clone)]
pub struct Executor {
    policy: RetryPolicy,
    timeout: Duration,
}

impl Executor {
    /// Creates an executor. The per-attempt `timeout` must not be zero.
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than 0"));
        }
        Ok(Executor { policy, timeout })
    }

    /// The retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Calls `operation` through `breaker` until it succeeds, fails fatally,
    /// the retry budget is spent or the breaker rejects the call.
    ///
    /// The operation classifies its own failures with `Failure`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        operation: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
    {
        execute(operation, &self.policy, breaker, self.timeout).await
    }

    /// Same as `execute`, but the operation returns plain errors which are
    /// classified by `predicate`.
    pub async fn execute_with<T, E, P, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        predicate: P,
        mut operation: F,
    ) -> Result<T, CallError<E>>
    where
        P: FailurePredicate<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let predicate = &predicate;
        self.execute(breaker, move || {
            let future = operation();
            async move {
                future.await.map_err(|err| {
                    let kind = predicate.classify(&err);
                    Failure::new(err, kind)
                })
            }
        })
        .await
    }
}

/// Calls `operation` through `breaker` with the given retry policy and
/// per-attempt deadline.
///
/// Dropping the returned future cancels the current attempt; its permission is
/// given back to the breaker without counting as a success or a failure.
pub async fn execute<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    timeout: Duration,
) -> Result<T, CallError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure<E>>>,
{
    let name = breaker.name();
    let mut attempt = 1;

    loop {
        let permit = breaker.permit();
        if !permit.is_allowed() {
            breaker.record_attempt(&CallAttempt {
                number: attempt,
                started_at: tokio::time::Instant::now().into_std(),
                elapsed: Duration::ZERO,
                outcome: Outcome::Rejected,
            });
            tracing::debug!(dependency = name, attempt, "circuit open, failing fast");
            return Err(CallError::CircuitOpen {
                name: name.to_owned(),
            });
        }

        let guard = PermitGuard::new(breaker, permit);
        let started_at = tokio::time::Instant::now();
        let result = tokio::time::timeout(timeout, operation()).await;
        let record = |outcome| {
            breaker.record_attempt(&CallAttempt {
                number: attempt,
                started_at: started_at.into_std(),
                elapsed: started_at.elapsed(),
                outcome,
            })
        };

        let retry_after = match result {
            Ok(Ok(value)) => {
                guard.success();
                record(Outcome::Success);
                tracing::debug!(dependency = name, attempt, "attempt succeeded");
                return Ok(value);
            }
            Ok(Err(failure)) => {
                let kind = failure.kind();
                if kind.is_counted() {
                    guard.failure();
                } else {
                    guard.release();
                }
                let outcome = Outcome::from(kind);
                record(outcome);

                if kind != FailureKind::Retryable {
                    tracing::warn!(
                        dependency = name,
                        attempt,
                        outcome = outcome.as_str(),
                        "attempt failed permanently"
                    );
                    return Err(CallError::Fatal {
                        name: name.to_owned(),
                        attempt,
                        source: failure.into_error(),
                    });
                }
                if !policy.should_retry(attempt, outcome) {
                    tracing::warn!(dependency = name, attempts = attempt, "retries exhausted");
                    return Err(CallError::RetriesExhausted {
                        name: name.to_owned(),
                        attempts: attempt,
                        source: failure.into_error(),
                    });
                }
                failure.retry_after()
            }
            Err(_) => {
                guard.failure();
                record(Outcome::TimedOut);

                if !policy.should_retry(attempt, Outcome::TimedOut) {
                    tracing::warn!(
                        dependency = name,
                        attempts = attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "attempt timed out, retries exhausted"
                    );
                    return Err(CallError::Timeout {
                        name: name.to_owned(),
                        attempts: attempt,
                        timeout,
                    });
                }
                None
            }
        };

        let delay = match retry_after {
            Some(delay) => delay.min(policy.backoff().max_delay()),
            None => policy.delay_for(attempt),
        };
        tracing::warn!(
            dependency = name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Holds a breaker permission for the duration of an attempt.
///
/// Dropped without an outcome, e.g. when the caller cancels the call, it
/// releases the permission.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    armed: bool,
}

impl<'a> PermitGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, permit: Permit) -> Self {
        PermitGuard {
            breaker,
            permit,
            armed: true,
        }
    }

    fn success(mut self) {
        self.armed = false;
        self.breaker.report_success(self.permit);
    }

    fn failure(mut self) {
        self.armed = false;
        self.breaker.report_failure(self.permit);
    }

    fn release(self) {}
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release(self.permit);
        }
    }
}
