//! Circuit breakers keyed by operation name.
//!
//! A breaker opens after `failure_threshold` consecutive failures, rejects
//! calls until `timeout` has elapsed, then lets exactly one trial call
//! through. The trial's outcome decides whether it closes or re-opens.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::error::JenkinsError;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is allowed.
    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

/// Admission to call through a breaker. Report the outcome with
/// [`Permit::succeed`] or [`Permit::fail`]; dropping an unresolved half-open
/// trial re-opens the circuit.
#[must_use = "report the call outcome with succeed() or fail()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl Permit<'_> {
    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.resolved {
            self.breaker.on_failure(true);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failures
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().expect("circuit breaker lock poisoned")
    }

    /// Ask for admission. Fails with a `CircuitOpen` error while the circuit
    /// is open or a half-open trial is already in flight.
    pub fn try_acquire(&self) -> Result<Permit<'_>, JenkinsError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                trial: false,
                resolved: false,
            }),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    info!(breaker = %self.name, "circuit half-open, allowing trial call");
                    Ok(Permit {
                        breaker: self,
                        trial: true,
                        resolved: false,
                    })
                } else {
                    Err(JenkinsError::circuit_open(&self.name))
                }
            }
            CircuitState::HalfOpen => Err(JenkinsError::circuit_open(&self.name)),
        }
    }

    /// Run `f` through the breaker, counting any error as a failure.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, JenkinsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JenkinsError>>,
    {
        let permit = self.try_acquire()?;
        match f().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                permit.fail();
                Err(err)
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        if !trial && inner.state != CircuitState::Closed {
            // A call admitted before the circuit opened; the trial decides.
            return;
        }
        if trial {
            info!(breaker = %self.name, "circuit closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        if trial {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            return;
        }
        inner.failures = inner.failures.saturating_add(1);
        if inner.state == CircuitState::Closed && inner.failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                breaker = %self.name,
                failures = inner.failures,
                "circuit opened"
            );
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }
}

/// Lazily created breakers, one per operation name.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, operation: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry lock poisoned");
        breakers
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(operation, self.config.clone())))
            .clone()
    }

    /// Forget every breaker; the next lookup starts closed.
    pub fn reset(&self) {
        self.breakers
            .lock()
            .expect("breaker registry lock poisoned")
            .clear();
    }

    /// Current state of every breaker created so far, sorted by name.
    pub fn states(&self) -> Vec<(String, CircuitState, u32)> {
        let breakers = self.breakers.lock().expect("breaker registry lock poisoned");
        let mut states: Vec<_> = breakers
            .values()
            .map(|b| (b.name().to_string(), b.state(), b.failure_count()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
