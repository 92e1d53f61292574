use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use super::circuit_breaker::CircuitBreaker;
use super::clock::{Clock, SystemClock};
use super::error::ConfigError;
use super::executor::Executor;
use super::instrument::{Instrument, LogInstrument};
use super::retry::RetryPolicy;
use super::state_machine::StateMachine;

/// The prefix of environment variables read by `Settings::load`.
pub const ENV_PREFIX: &str = "FAILGUARD_";

/// A `CircuitBreaker`'s configuration.
pub struct Config<INSTRUMENT> {
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
    pub(crate) instrument: INSTRUMENT,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Config<LogInstrument> {
    /// Creates a new circuit breaker's default configuration: opens after 5
    /// consecutive failures, tries to recover after 30 seconds, logs through
    /// `tracing`.
    pub fn new() -> Config<LogInstrument> {
        Config {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            instrument: LogInstrument,
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for Config<LogInstrument> {
    fn default() -> Self {
        Config::new()
    }
}

impl<INSTRUMENT> Config<INSTRUMENT> {
    /// Configures how many consecutive failures open the circuit.
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self
    }

    /// Configures how long an open circuit rejects calls before a trial call.
    pub fn recovery_timeout(mut self, recovery_timeout: Duration) -> Self {
        self.recovery_timeout = recovery_timeout;
        self
    }

    /// Configures `Instrument` for a circuit breaker.
    pub fn instrument<T>(self, instrument: T) -> Config<T>
    where
        T: Instrument,
    {
        Config {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            instrument,
            clock: self.clock,
        }
    }

    /// Configures the time source for a circuit breaker.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds a new circuit breaker instance guarding the dependency `name`.
    pub fn build(self, name: impl Into<String>) -> Result<CircuitBreaker, ConfigError>
    where
        INSTRUMENT: Instrument + 'static,
    {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        Ok(self.into_circuit_breaker(name))
    }

    pub(crate) fn into_circuit_breaker(self, name: impl Into<String>) -> CircuitBreaker
    where
        INSTRUMENT: Instrument + 'static,
    {
        let instrument: Arc<dyn Instrument> = Arc::new(self.instrument);
        let state_machine = StateMachine::new(
            name,
            self.failure_threshold,
            self.recovery_timeout,
            instrument,
        );
        CircuitBreaker::from_parts(state_machine, self.clock)
    }
}

impl<INSTRUMENT> Clone for Config<INSTRUMENT>
where
    INSTRUMENT: Clone,
{
    fn clone(&self) -> Self {
        Config {
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            instrument: self.instrument.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<INSTRUMENT> fmt::Debug for Config<INSTRUMENT>
where
    INSTRUMENT: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("instrument", &self.instrument)
            .finish()
    }
}

/// Every recognized option of a guarded call, loadable from a file and the
/// environment.
///
/// Settings are loaded in priority order:
/// 1. Environment variables prefixed with `FAILGUARD_` (highest priority)
/// 2. An optional TOML file
/// 3. Built-in defaults (lowest priority)
///
/// Durations are given in milliseconds.
///
/// ```no_run
/// use failguard::Settings;
///
/// // FAILGUARD_MAX_ATTEMPTS=5 FAILGUARD_TIMEOUT_MS=250
/// let settings = Settings::load().expect("invalid settings");
/// let executor = settings.executor().expect("invalid settings");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The attempts budget including the first attempt.
    ///
    /// Environment variable: `FAILGUARD_MAX_ATTEMPTS`
    pub max_attempts: u32,
    /// The delay after the first failed attempt.
    ///
    /// Environment variable: `FAILGUARD_BASE_DELAY_MS`
    pub base_delay_ms: u64,
    /// The upper bound of any retry delay.
    ///
    /// Environment variable: `FAILGUARD_MAX_DELAY_MS`
    pub max_delay_ms: u64,
    /// The growth factor between retry delays.
    ///
    /// Environment variable: `FAILGUARD_MULTIPLIER`
    pub multiplier: f64,
    /// The fraction of each delay randomized, in `[0, 1)`.
    ///
    /// Environment variable: `FAILGUARD_JITTER_FRACTION`
    pub jitter_fraction: f64,
    /// The per-attempt deadline.
    ///
    /// Environment variable: `FAILGUARD_TIMEOUT_MS`
    pub timeout_ms: u64,
    /// Consecutive failures which open a circuit.
    ///
    /// Environment variable: `FAILGUARD_FAILURE_THRESHOLD`
    pub failure_threshold: u32,
    /// How long an open circuit rejects calls.
    ///
    /// Environment variable: `FAILGUARD_RECOVERY_TIMEOUT_MS`
    pub recovery_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.0,
            timeout_ms: 5_000,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

impl Settings {
    /// Built-in defaults overridden by the environment.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    /// Loads settings from the defaults and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// Loads settings from the defaults, a TOML file and the environment.
    ///
    /// A missing file is not an error.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));
        Self::from_figment(figment)
    }

    /// Extracts and validates settings from any figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy()?;
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("timeout_ms", "must be greater than 0"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        Ok(())
    }

    /// The retry policy described by these settings.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .multiplier(self.multiplier)
            .jitter_fraction(self.jitter_fraction)
            .build()
    }

    /// The per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// How long an open circuit rejects calls.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    /// A circuit breaker configuration with these thresholds.
    pub fn breaker_config(&self) -> Config<LogInstrument> {
        Config::new()
            .failure_threshold(self.failure_threshold)
            .recovery_timeout(self.recovery_timeout())
    }

    /// An executor with this retry policy and per-attempt deadline.
    pub fn executor(&self) -> Result<Executor, ConfigError> {
        self.validate()?;
        Executor::new(self.retry_policy()?, self.timeout())
    }
}
