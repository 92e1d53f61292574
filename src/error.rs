use std::time::Duration;

use thiserror::Error;

/// The terminal error of a call made through the executor.
///
/// The variants tell the caller whether anything is worth doing about the
/// failure: `CircuitOpen`, `RetriesExhausted` and `Timeout` mean the dependency
/// is unavailable right now, `Fatal` means the request itself was refused.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The circuit breaker rejected the call, the operation was not invoked.
    #[error("circuit breaker for {name} is open")]
    CircuitOpen {
        /// The dependency's name.
        name: String,
    },

    /// Every attempt failed with a retryable error.
    #[error("{name}: giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The dependency's name.
        name: String,
        /// The number of attempts made.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: E,
    },

    /// The operation reported a non-retryable failure.
    #[error("{name}: attempt {attempt} failed permanently: {source}")]
    Fatal {
        /// The dependency's name.
        name: String,
        /// The attempt which failed.
        attempt: u32,
        /// The operation's error.
        #[source]
        source: E,
    },

    /// The last attempt exceeded its deadline and no attempts remain.
    #[error("{name}: attempt {attempts} timed out after {timeout:?}")]
    Timeout {
        /// The dependency's name.
        name: String,
        /// The number of attempts made.
        attempts: u32,
        /// The per-attempt deadline.
        timeout: Duration,
    },
}

impl<E> CallError<E> {
    /// Returns a stable machine readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            CallError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            CallError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            CallError::Fatal { .. } => "FATAL_OPERATION",
            CallError::Timeout { .. } => "TIMEOUT",
        }
    }

    /// The name of the dependency the call was made to.
    pub fn name(&self) -> &str {
        match self {
            CallError::CircuitOpen { name }
            | CallError::RetriesExhausted { name, .. }
            | CallError::Fatal { name, .. }
            | CallError::Timeout { name, .. } => name,
        }
    }

    /// Returns `true` if the same request may succeed later, i.e. the
    /// dependency was unavailable rather than the request being refused.
    pub fn is_retryable_later(&self) -> bool {
        !matches!(self, CallError::Fatal { .. })
    }

    /// Returns `true` if the call was rejected by an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    /// Returns the operation's error, if the call got one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::RetriesExhausted { source, .. } | CallError::Fatal { source, .. } => {
                Some(source)
            }
            CallError::CircuitOpen { .. } | CallError::Timeout { .. } => None,
        }
    }
}

/// An invalid retry policy, circuit breaker or settings value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its allowed range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// The offending option.
        field: &'static str,
        /// Why the value was refused.
        reason: String,
    },

    /// Settings could not be loaded.
    #[error("failed to load settings: {0}")]
    Load(#[from] figment::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
