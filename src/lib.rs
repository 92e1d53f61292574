//! Resilient outbound calls: retries with exponential backoff, a per-attempt
//! deadline and a circuit breaker, composed explicitly at the call site.
//!
//! A circuit breaker is used to detect failures and encapsulates the logic of
//! preventing a failure from constantly recurring, during maintenance,
//! temporary external system failure or unexpected system difficulties.
//! See https://martinfowler.com/bliki/CircuitBreaker.html
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use failguard::{CallError, Failure, Registry, Settings};
//!
//! #[derive(Debug)]
//! enum HttpError {
//!     Connect,
//!     Status(u16),
//! }
//!
//! async fn get_user(id: u64) -> Result<String, HttpError> {
//! #   let _ = id;
//!     Err(HttpError::Connect)
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // One registry per process, built at startup and passed around explicitly.
//! let registry = Registry::new(&Settings::load()?)?;
//!
//! let user = registry
//!     .execute("users", || async {
//!         get_user(42).await.map_err(|err| match err {
//!             HttpError::Status(400..=499) => Failure::invalid(err),
//!             _ => Failure::retryable(err),
//!         })
//!     })
//!     .await;
//!
//! match user {
//!     Ok(user) => println!("{}", user),
//!     Err(CallError::CircuitOpen { .. }) => println!("users service is unavailable"),
//!     Err(err) => println!("{}: {:?}", err.code(), err),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

mod backoff;
mod circuit_breaker;
mod clock;
mod config;
mod error;
mod executor;
mod failure;
mod instrument;
mod registry;
mod retry;
mod state_machine;

pub use self::backoff::Backoff;
pub use self::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
pub use self::clock::{Clock, MockClock, SystemClock};
pub use self::config::{Config, Settings, ENV_PREFIX};
pub use self::error::{CallError, ConfigError};
pub use self::executor::{execute, CallAttempt, Executor};
pub use self::failure::{AllRetryable, Failure, FailureKind, FailurePredicate, Outcome};
pub use self::instrument::{Instrument, LogInstrument, NoopInstrument};
pub use self::registry::{HealthReport, Registry};
pub use self::retry::{RetryPolicy, RetryPolicyBuilder};
pub use self::state_machine::{Permit, State, StateMachine, TrialId};
