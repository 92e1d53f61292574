use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A source of monotonic time for backoff and recovery timeout decisions.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    #[inline]
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// The default clock.
///
/// Reads time through tokio, so a runtime with paused time (see
/// `tokio::time::pause`) moves circuit breakers forward together with the
/// executor's sleeps. Outside of a runtime it is the plain monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// A manually driven clock.
///
/// Clones share the same time, so one handle can be given to a circuit breaker
/// while the test keeps another to advance it.
#[derive(Clone)]
pub struct MockClock(Arc<Mutex<Instant>>);

impl MockClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> MockClock {
        MockClock(Arc::new(Mutex::new(Instant::now())))
    }

    /// Moves the clock forward.
    pub fn advance(&self, diff: Duration) {
        *self.0.lock() += diff
    }
}

impl Default for MockClock {
    fn default() -> Self {
        MockClock::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("MockClock").field(&*self.0.lock()).finish()
    }
}
