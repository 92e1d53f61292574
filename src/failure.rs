use std::fmt::{self, Display};
use std::time::Duration;

/// How a failed attempt is treated by the retry loop and the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A transient failure of the dependency, e.g. a refused connection.
    /// Retried while the budget allows and counted by the circuit breaker.
    Retryable,
    /// A permanent failure reported by the dependency. Never retried, counted
    /// by the circuit breaker.
    Fatal,
    /// The request itself is invalid. Never retried and not counted by the
    /// circuit breaker, since the dependency is not at fault.
    Invalid,
}

impl FailureKind {
    /// Returns `true` if the failure counts against the dependency's health.
    #[inline]
    pub fn is_counted(self) -> bool {
        !matches!(self, FailureKind::Invalid)
    }
}

/// The outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation returned a value.
    Success,
    /// The operation failed transiently.
    Retryable,
    /// The operation failed permanently.
    Fatal,
    /// The operation refused the caller's input.
    Invalid,
    /// The operation exceeded its deadline. Treated as retryable.
    TimedOut,
    /// The circuit breaker refused the attempt, the operation was not invoked.
    Rejected,
}

impl Outcome {
    /// Returns `true` for outcomes which may be retried.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, Outcome::Retryable | Outcome::TimedOut)
    }

    /// Returns a string value for the outcome.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Retryable => "retryable",
            Outcome::Fatal => "fatal",
            Outcome::Invalid => "invalid",
            Outcome::TimedOut => "timed_out",
            Outcome::Rejected => "rejected",
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FailureKind> for Outcome {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Retryable => Outcome::Retryable,
            FailureKind::Fatal => Outcome::Fatal,
            FailureKind::Invalid => Outcome::Invalid,
        }
    }
}

/// A classified error returned by an operation run through the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure<E> {
    error: E,
    kind: FailureKind,
    retry_after: Option<Duration>,
}

impl<E> Failure<E> {
    /// A transient failure worth retrying.
    pub fn retryable(error: E) -> Self {
        Self::new(error, FailureKind::Retryable)
    }

    /// A permanent failure of the dependency.
    pub fn fatal(error: E) -> Self {
        Self::new(error, FailureKind::Fatal)
    }

    /// A failure caused by the caller's input.
    pub fn invalid(error: E) -> Self {
        Self::new(error, FailureKind::Invalid)
    }

    /// Creates a failure of the given kind.
    pub fn new(error: E, kind: FailureKind) -> Self {
        Failure {
            error,
            kind,
            retry_after: None,
        }
    }

    /// Asks the executor to wait the given time before the next attempt instead
    /// of the backoff delay. Only meaningful for retryable failures.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// The failure's kind.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// A reference to the underlying error.
    pub fn error(&self) -> &E {
        &self.error
    }

    /// Unwraps the underlying error.
    pub fn into_error(self) -> E {
        self.error
    }
}

impl<E> Display for Failure<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.error, f)
    }
}

/// Classifies a plain error returned by an operation.
pub trait FailurePredicate<E> {
    /// Returns the kind of failure the error represents.
    fn classify(&self, err: &E) -> FailureKind;
}

impl<E, F> FailurePredicate<E> for F
where
    F: Fn(&E) -> FailureKind,
{
    #[inline]
    fn classify(&self, err: &E) -> FailureKind {
        self(err)
    }
}

/// Classifies every error as retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllRetryable;

impl<E> FailurePredicate<E> for AllRetryable {
    #[inline]
    fn classify(&self, _: &E) -> FailureKind {
        FailureKind::Retryable
    }
}
