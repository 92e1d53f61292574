use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use super::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use super::config::{Config, Settings};
use super::error::{CallError, ConfigError};
use super::executor::Executor;
use super::failure::{Failure, FailurePredicate};
use super::instrument::Instrument;
use super::state_machine::State;

/// Circuit breakers for every dependency of a process, sharing one executor.
///
/// Constructed once at startup and passed to whoever makes outbound calls;
/// breakers are created on first use of a dependency name and live as long
/// as the registry.
pub struct Registry {
    executor: Executor,
    config: Config<Arc<dyn Instrument>>,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

/// The state of every known dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// One snapshot per dependency, ordered by name.
    pub dependencies: Vec<BreakerSnapshot>,
}

impl HealthReport {
    /// Returns `true` if no circuit is open.
    pub fn is_healthy(&self) -> bool {
        self.dependencies
            .iter()
            .all(|it| !matches!(it.state, State::Open(_)))
    }

    /// The names of the dependencies with an open circuit.
    pub fn unavailable(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|it| matches!(it.state, State::Open(_)))
            .map(|it| it.name.as_str())
    }
}

impl Registry {
    /// Creates a registry from validated settings.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self::with_config(settings.executor()?, settings.breaker_config()))
    }

    /// Creates a registry with the given executor; every breaker is built from `config`.
    pub fn with_config<INSTRUMENT>(executor: Executor, config: Config<INSTRUMENT>) -> Self
    where
        INSTRUMENT: Instrument + 'static,
    {
        let instrument: Arc<dyn Instrument> = Arc::new(config.instrument);
        let config = Config {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
            instrument,
            clock: config.clock,
        };
        Registry {
            executor,
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The shared executor.
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Returns the breaker of dependency `name`, creating it on first use.
    pub fn breaker(&self, name: &str) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        self.breakers
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| {
                tracing::debug!(dependency = name, "registering circuit breaker");
                self.config.clone().into_circuit_breaker(name)
            })
            .clone()
    }

    /// Returns the breaker of dependency `name` if it was ever used.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    /// Calls `operation` against dependency `name`, see `Executor::execute`.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
    {
        let breaker = self.breaker(name);
        self.executor.execute(&breaker, operation).await
    }

    /// Calls `operation` against dependency `name`, see `Executor::execute_with`.
    pub async fn execute_with<T, E, P, F, Fut>(
        &self,
        name: &str,
        predicate: P,
        operation: F,
    ) -> Result<T, CallError<E>>
    where
        P: FailurePredicate<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.breaker(name);
        self.executor.execute_with(&breaker, predicate, operation).await
    }

    /// Snapshots every known breaker.
    pub fn health(&self) -> HealthReport {
        let mut dependencies: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(CircuitBreaker::snapshot)
            .collect();
        dependencies.sort_by(|a, b| a.name.cmp(&b.name));
        HealthReport { dependencies }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry")
            .field("executor", &self.executor)
            .field("breakers", &*self.breakers.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::clock::MockClock;
    use super::super::instrument::NoopInstrument;
    use super::super::retry::RetryPolicy;
    use super::*;

    #[test]
    fn same_name_same_breaker() {
        let registry = new_registry();

        let a = registry.breaker("db");
        let b = registry.breaker("db");
        let c = registry.breaker("cache");

        let permit = a.permit();
        a.report_failure(permit);

        assert_eq!(1, b.snapshot().failure_count);
        assert_eq!(0, c.snapshot().failure_count);
        assert!(registry.get("queue").is_none());
    }

    #[tokio::test]
    async fn health_reports_open_circuits() {
        let registry = new_registry();

        let res: Result<(), _> = registry
            .execute("search", || async { Err::<(), _>(Failure::fatal("down")) })
            .await;
        assert!(res.is_err());
        registry.execute("db", || async { Ok::<_, Failure<()>>(()) }).await.unwrap();

        let health = registry.health();
        assert_eq!(
            vec!["db", "search"],
            health
                .dependencies
                .iter()
                .map(|it| it.name.as_str())
                .collect::<Vec<_>>()
        );
        assert!(!health.is_healthy());
        assert_eq!(vec!["search"], health.unavailable().collect::<Vec<_>>());

        registry.breaker("search").reset();
        assert!(registry.health().is_healthy());
    }

    #[test]
    fn from_settings() {
        let settings = Settings {
            failure_threshold: 2,
            ..Settings::default()
        };
        let registry = Registry::new(&settings).unwrap();

        assert_eq!(Duration::from_secs(5), registry.executor().timeout());

        let breaker = registry.breaker("db");
        for _ in 0..2 {
            let permit = breaker.permit();
            breaker.report_failure(permit);
        }
        assert!(!breaker.is_available());
    }

    fn new_registry() -> Registry {
        let executor = Executor::new(RetryPolicy::never(), Duration::from_secs(1)).unwrap();
        let config = Config::new()
            .failure_threshold(1)
            .instrument(NoopInstrument)
            .clock(MockClock::new());
        Registry::with_config(executor, config)
    }
}
