use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::clock::Clock;
use super::config::Config;
use super::executor::CallAttempt;
use super::instrument::{Instrument, LogInstrument};
use super::state_machine::{Permit, State, StateMachine};

/// A thread safe circuit breaker guarding one downstream dependency.
///
/// Clones share the same state, so a single breaker is created per dependency
/// at startup and handed to every caller. All reads and transitions of the
/// state go through one lock, which is never held while an operation runs.
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state_machine: Mutex<StateMachine<Arc<dyn Instrument>>>,
    instrument: Arc<dyn Instrument>,
    clock: Arc<dyn Clock>,
}

/// A point in time view of a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// The dependency's name.
    pub name: String,
    /// The breaker's state.
    pub state: State,
    /// Counted failures since the breaker was last closed.
    pub failure_count: u32,
    /// Whether a half open trial call is in flight.
    pub trial_in_flight: bool,
}

impl CircuitBreaker {
    /// Returns a circuit breaker's builder.
    pub fn builder() -> Config<LogInstrument> {
        Config::new()
    }

    /// Creates a circuit breaker with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Config::new().into_circuit_breaker(name)
    }

    pub(crate) fn from_parts(
        state_machine: StateMachine<Arc<dyn Instrument>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: state_machine.name().to_owned(),
                instrument: state_machine.instrument().clone(),
                state_machine: Mutex::new(state_machine),
                clock,
            }),
        }
    }

    /// The name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Requests permission to call the dependency.
    ///
    /// If the permit is allowed, exactly one of `report_success`,
    /// `report_failure` or `release` must follow with the same permit.
    #[inline]
    pub fn permit(&self) -> Permit {
        let now = self.inner.clock.now();
        self.inner.state_machine.lock().permit(now)
    }

    /// Records a successful call made under `permit`.
    #[inline]
    pub fn report_success(&self, permit: Permit) {
        self.inner.state_machine.lock().on_success(permit);
    }

    /// Records a failed call made under `permit`.
    #[inline]
    pub fn report_failure(&self, permit: Permit) {
        let now = self.inner.clock.now();
        self.inner.state_machine.lock().on_error(permit, now);
    }

    /// Gives `permit` back without counting it as a success or a failure.
    #[inline]
    pub fn release(&self, permit: Permit) {
        self.inner.state_machine.lock().release(permit);
    }

    /// Forces the breaker back to the closed state.
    pub fn reset(&self) {
        self.inner.state_machine.lock().reset();
    }

    /// The current state.
    ///
    /// An open breaker whose recovery timeout elapsed is still reported as
    /// open until the next `permit`.
    pub fn state(&self) -> State {
        self.inner.state_machine.lock().state()
    }

    /// Returns `true` unless the breaker is open.
    pub fn is_available(&self) -> bool {
        !matches!(self.state(), State::Open(_))
    }

    /// Returns a consistent view of the breaker's state and counters.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state_machine = self.inner.state_machine.lock();
        BreakerSnapshot {
            name: self.inner.name.clone(),
            state: state_machine.state(),
            failure_count: state_machine.failure_count(),
            trial_in_flight: state_machine.is_trial_in_flight(),
        }
    }

    pub(crate) fn record_attempt(&self, attempt: &CallAttempt) {
        self.inner.instrument.on_attempt(&self.inner.name, attempt);
    }
}

impl Clone for CircuitBreaker {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
