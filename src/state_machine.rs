use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use super::instrument::Instrument;

/// States of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// A closed breaker is operating normally and allowing.
    Closed,
    /// An open breaker has tripped at the given instant and will not allow
    /// requests through until the recovery timeout expired.
    Open(Instant),
    /// A half open breaker has completed its wait interval and allows a single
    /// trial call.
    HalfOpen,
}

/// A decision of the state machine about a call.
///
/// The permit is handed back with the call's outcome, so the state machine
/// can tell the half open trial apart from calls permitted earlier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// The call may proceed. Its outcome must be reported exactly once.
    Allowed,
    /// The call may proceed as the half open trial. Its outcome decides
    /// whether the circuit closes or opens again.
    Trial(TrialId),
    /// The call must not be made.
    Rejected,
}

/// Identifies one half open trial call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrialId(u64);

impl Permit {
    /// Returns `true` if the call may proceed.
    #[inline]
    pub fn is_allowed(self) -> bool {
        !matches!(self, Permit::Rejected)
    }

    /// Returns `true` if the call is the half open trial.
    #[inline]
    pub fn is_trial(self) -> bool {
        matches!(self, Permit::Trial(_))
    }
}

impl State {
    /// Returns a string value for the state identifier.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Open(_) => "open",
            State::Closed => "closed",
            State::HalfOpen => "half_open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

/// A circuit breaker' state machine.
///
/// It is implemented via a finite state machine with three states: `Closed`, `Open` and `HalfOpen`.
/// The state machine does not know anything about the backend's state by itself, but uses the
/// information provided by the method via `on_success` and `on_error` events. Before communicating
/// with the backend, the permission to do so must be obtained via the method `permit`, and the
/// same permit is passed back with the outcome.
///
/// The state of the state machine changes from `Closed` to `Open` when `failure_threshold`
/// consecutive failures are recorded. Then, all access to the backend is blocked for
/// `recovery_timeout`.
///
/// After the time duration has elapsed, the first caller moves the state machine to `HalfOpen`
/// and becomes the only trial call; everyone else is still rejected while it's in flight. If the
/// trial fails, the state will change back to `Open`. Otherwise it changes to `Closed`. Outcomes
/// of calls permitted before the trial never move a half open state machine.
///
/// The state machine is not synchronized and never reads the clock, callers pass the current
/// instant in. `CircuitBreaker` wraps it with a lock and a `Clock`.
#[derive(Debug)]
pub struct StateMachine<INSTRUMENT> {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    instrument: INSTRUMENT,
    state: State,
    failure_count: u32,
    trial: Option<TrialId>,
    trials: u64,
}

impl<INSTRUMENT> StateMachine<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    /// Creates a new closed state machine.
    ///
    /// A `failure_threshold` of zero is treated as one.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        instrument: INSTRUMENT,
    ) -> Self {
        StateMachine {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            instrument,
            state: State::Closed,
            failure_count: 0,
            trial: None,
            trials: 0,
        }
    }

    /// The name of the guarded dependency.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The number of counted failures since the breaker was last closed.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Returns `true` while a half open trial call is in flight.
    pub fn is_trial_in_flight(&self) -> bool {
        self.trial.is_some()
    }

    /// The instrument receiving this state machine's events.
    pub fn instrument(&self) -> &INSTRUMENT {
        &self.instrument
    }

    /// Requests permission to call this circuit breaker's backend.
    ///
    /// Never blocks. The only side effects are the `Open` -> `HalfOpen`
    /// transition and marking the trial call in flight.
    pub fn permit(&mut self, now: Instant) -> Permit {
        match self.state {
            State::Closed => Permit::Allowed,
            State::HalfOpen if self.trial.is_none() => self.start_trial(),
            State::HalfOpen => self.reject(),
            State::Open(opened_at) => {
                if now.saturating_duration_since(opened_at) >= self.recovery_timeout {
                    self.transit_to_half_open();
                    return self.start_trial();
                }
                self.reject()
            }
        }
    }

    /// Records a successful call made under `permit`.
    pub fn on_success(&mut self, permit: Permit) {
        match self.state {
            State::Closed if permit.is_allowed() => self.failure_count = 0,
            State::HalfOpen if self.is_current_trial(permit) => self.transit_to_closed(),
            // Permitted before the circuit opened, or an earlier trial.
            _ => {}
        }
    }

    /// Records a failed call made under `permit`.
    pub fn on_error(&mut self, permit: Permit, now: Instant) {
        match self.state {
            State::Closed if permit.is_allowed() => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= self.failure_threshold {
                    self.transit_to_open(now);
                }
            }
            State::HalfOpen if self.is_current_trial(permit) => {
                self.failure_count = self.failure_count.saturating_add(1);
                self.transit_to_open(now);
            }
            _ => {}
        }
    }

    /// Gives `permit` back without recording an outcome.
    ///
    /// Used for cancelled calls and calls refused for the caller's own fault. A
    /// released half open trial lets the next caller become the trial.
    pub fn release(&mut self, permit: Permit) {
        if self.state == State::HalfOpen && self.is_current_trial(permit) {
            self.trial = None;
        }
    }

    /// Returns the circuit breaker to its original closed state, losing statistics.
    #[inline]
    pub fn reset(&mut self) {
        self.transit_to_closed();
    }

    #[inline]
    fn is_current_trial(&self, permit: Permit) -> bool {
        matches!(permit, Permit::Trial(trial) if self.trial == Some(trial))
    }

    #[inline]
    fn start_trial(&mut self) -> Permit {
        self.trials = self.trials.wrapping_add(1);
        let trial = TrialId(self.trials);
        self.trial = Some(trial);
        Permit::Trial(trial)
    }

    #[inline]
    fn reject(&self) -> Permit {
        self.instrument.on_call_rejected(&self.name);
        Permit::Rejected
    }

    #[inline]
    fn transit_to_closed(&mut self) {
        self.state = State::Closed;
        self.failure_count = 0;
        self.trial = None;
        self.instrument.on_closed(&self.name);
    }

    #[inline]
    fn transit_to_half_open(&mut self) {
        self.state = State::HalfOpen;
        self.instrument.on_half_open(&self.name);
    }

    #[inline]
    fn transit_to_open(&mut self, now: Instant) {
        self.state = State::Open(now);
        self.trial = None;
        self.instrument
            .on_open(&self.name, self.failure_count, &self.recovery_timeout);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Perform `Closed` -> `Open` -> `HalfOpen` -> `Open` -> `HalfOpen` -> `Closed` transitions.
    #[test]
    fn state_machine() {
        let observe = Observer::new();
        let mut now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 3, 5.seconds(), observe.clone());

        assert_eq!(Permit::Allowed, state_machine.permit(now));

        // Perform success requests. the circuit breaker must be closed.
        for _i in 0..10 {
            let permit = state_machine.permit(now);
            assert_eq!(Permit::Allowed, permit);
            state_machine.on_success(permit);
            assert_eq!(true, observe.is_closed());
        }

        // Perform failed requests, the circuit breaker still closed.
        for _i in 0..2 {
            let permit = state_machine.permit(now);
            assert_eq!(Permit::Allowed, permit);
            state_machine.on_error(permit, now);
            assert_eq!(true, observe.is_closed());
        }
        assert_eq!(2, state_machine.failure_count());

        // Perform a failed request and transit to the open state for 5s.
        let permit = state_machine.permit(now);
        state_machine.on_error(permit, now);
        assert_eq!(true, observe.is_open());
        assert_eq!(State::Open(now), state_machine.state());

        // Reject call attempts, the circuit breaker in open state.
        for i in 0..10 {
            assert_eq!(Permit::Rejected, state_machine.permit(now));
            assert_eq!(i + 1, observe.rejected_calls());
        }

        // Wait 2s, the circuit breaker still open.
        now += 2.seconds();
        assert_eq!(Permit::Rejected, state_machine.permit(now));
        assert_eq!(true, observe.is_open());

        // Wait 4s (6s total), the circuit breaker now in the half open state.
        now += 4.seconds();
        let trial = state_machine.permit(now);
        assert_eq!(true, trial.is_trial());
        assert_eq!(true, observe.is_half_open());

        // The trial is in flight, everyone else is rejected.
        assert_eq!(Permit::Rejected, state_machine.permit(now));

        // Perform a failed request and transit back to the open state, the timer restarts.
        state_machine.on_error(trial, now);
        assert_eq!(State::Open(now), state_machine.state());
        assert_eq!(Permit::Rejected, state_machine.permit(now));
        assert_eq!(true, observe.is_open());

        // Wait 4s, the circuit breaker still open.
        now += 4.seconds();
        assert_eq!(Permit::Rejected, state_machine.permit(now));
        assert_eq!(true, observe.is_open());

        // Wait 1s (5s total), the circuit breaker now in the half open state.
        now += 1.seconds();
        let trial = state_machine.permit(now);
        assert_eq!(true, trial.is_trial());
        assert_eq!(true, observe.is_half_open());

        // Perform a success request and transit to the closed state.
        state_machine.on_success(trial);
        assert_eq!(Permit::Allowed, state_machine.permit(now));
        assert_eq!(true, observe.is_closed());
        assert_eq!(0, state_machine.failure_count());

        // Perform success requests.
        for _i in 0..10 {
            let permit = state_machine.permit(now);
            assert_eq!(Permit::Allowed, permit);
            state_machine.on_success(permit);
        }
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 3, 5.seconds(), Observer::new());

        for _ in 0..10 {
            state_machine.on_error(Permit::Allowed, now);
            state_machine.on_error(Permit::Allowed, now);
            state_machine.on_success(Permit::Allowed);
        }

        assert_eq!(State::Closed, state_machine.state());
        assert_eq!(0, state_machine.failure_count());
    }

    #[test]
    fn released_trial_is_granted_again() {
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 1, 1.seconds(), Observer::new());

        state_machine.on_error(Permit::Allowed, now);
        let now = now + 1.seconds();

        let first = state_machine.permit(now);
        assert_eq!(true, first.is_trial());
        assert_eq!(Permit::Rejected, state_machine.permit(now));

        state_machine.release(first);
        assert_eq!(State::HalfOpen, state_machine.state());
        assert_eq!(false, state_machine.is_trial_in_flight());

        let second = state_machine.permit(now);
        assert_eq!(true, second.is_trial());
        assert_ne!(first, second);
        assert_eq!(true, state_machine.is_trial_in_flight());

        // The released trial no longer speaks for the circuit.
        state_machine.on_success(first);
        state_machine.release(first);
        assert_eq!(State::HalfOpen, state_machine.state());
        assert_eq!(true, state_machine.is_trial_in_flight());

        state_machine.on_success(second);
        assert_eq!(State::Closed, state_machine.state());
    }

    #[test]
    fn late_reports_while_open_are_ignored() {
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 1, 10.seconds(), Observer::new());

        let late = state_machine.permit(now);
        state_machine.on_error(Permit::Allowed, now);
        state_machine.on_success(late);
        state_machine.on_error(late, now + 5.seconds());
        state_machine.release(late);

        assert_eq!(State::Open(now), state_machine.state());
    }

    #[test]
    fn late_reports_while_half_open_are_ignored() {
        let observe = Observer::new();
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 1, 10.seconds(), observe.clone());

        let slow = state_machine.permit(now);
        let failed = state_machine.permit(now);
        state_machine.on_error(failed, now);

        let now = now + 10.seconds();
        let trial = state_machine.permit(now);
        assert_eq!(true, observe.is_half_open());

        state_machine.on_success(slow);
        assert_eq!(State::HalfOpen, state_machine.state());
        state_machine.on_error(slow, now);
        assert_eq!(State::HalfOpen, state_machine.state());
        state_machine.release(slow);
        assert_eq!(true, state_machine.is_trial_in_flight());
        assert_eq!(Permit::Rejected, state_machine.permit(now));

        state_machine.on_success(trial);
        assert_eq!(true, observe.is_closed());
    }

    #[test]
    fn rejected_permit_reports_nothing() {
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 1, 10.seconds(), Observer::new());

        state_machine.on_error(Permit::Rejected, now);
        assert_eq!(State::Closed, state_machine.state());
        assert_eq!(0, state_machine.failure_count());
    }

    #[test]
    fn reset() {
        let observe = Observer::new();
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 1, 10.seconds(), observe.clone());

        state_machine.on_error(Permit::Allowed, now);
        assert_eq!(true, observe.is_open());

        state_machine.reset();
        assert_eq!(true, observe.is_closed());
        assert_eq!(Permit::Allowed, state_machine.permit(now));
    }

    #[test]
    fn zero_threshold_opens_on_first_failure() {
        let now = Instant::now();
        let mut state_machine = StateMachine::new("backend", 0, 1.seconds(), Observer::new());

        state_machine.on_error(Permit::Allowed, now);
        assert_eq!("open", state_machine.state().to_string());
    }

    #[derive(Debug)]
    enum ObservedState {
        Open,
        HalfOpen,
        Closed,
    }

    #[derive(Clone, Debug)]
    struct Observer {
        state: Arc<Mutex<ObservedState>>,
        rejected_calls: Arc<AtomicUsize>,
    }

    impl Observer {
        fn new() -> Self {
            Observer {
                state: Arc::new(Mutex::new(ObservedState::Closed)),
                rejected_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn is_closed(&self) -> bool {
            matches!(*self.state.lock().unwrap(), ObservedState::Closed)
        }

        fn is_open(&self) -> bool {
            matches!(*self.state.lock().unwrap(), ObservedState::Open)
        }

        fn is_half_open(&self) -> bool {
            matches!(*self.state.lock().unwrap(), ObservedState::HalfOpen)
        }

        fn rejected_calls(&self) -> usize {
            self.rejected_calls.load(Ordering::SeqCst)
        }
    }

    impl Instrument for Observer {
        fn on_call_rejected(&self, _: &str) {
            self.rejected_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn on_open(&self, name: &str, failures: u32, duration: &Duration) {
            println!("{} state=open after {} failures for {:?}", name, failures, duration);
            *self.state.lock().unwrap() = ObservedState::Open
        }

        fn on_half_open(&self, name: &str) {
            println!("{} state=half_open", name);
            *self.state.lock().unwrap() = ObservedState::HalfOpen
        }

        fn on_closed(&self, name: &str) {
            println!("{} state=closed", name);
            *self.state.lock().unwrap() = ObservedState::Closed
        }
    }

    trait IntoDuration {
        fn seconds(self) -> Duration;
    }

    impl IntoDuration for u64 {
        fn seconds(self) -> Duration {
            Duration::from_secs(self)
        }
    }
}
