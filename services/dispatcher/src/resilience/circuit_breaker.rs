use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::PublishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// One trial call is in flight; its outcome closes or re-opens the circuit.
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub name: String,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a trial call is admitted.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "outbox-publish".to_owned(),
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker shared by every dispatch of one
/// dispatcher. The lock is never held across an `.await`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `fut` if the circuit admits it and record its outcome. A rejected
    /// call never polls `fut` and fails with [`PublishError::CircuitOpen`].
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T, PublishError>
    where
        Fut: Future<Output = Result<T, PublishError>>,
    {
        self.try_acquire()?;
        let mut trial = TrialGuard {
            breaker: self,
            settled: false,
        };
        let result = fut.await;
        trial.settled = true;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_error(&self) -> PublishError {
        PublishError::CircuitOpen {
            name: self.config.name.clone(),
        }
    }

    fn try_acquire(&self) -> Result<(), PublishError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Err(self.open_error()),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.open_duration);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    info!(breaker = %self.config.name, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.config.name, "trial call succeeded, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.config.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.config.name,
                        failures = inner.consecutive_failures,
                        open_ms = self.config.open_duration.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
            // a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// A trial future dropped before completing must not leave the circuit
    /// stuck half-open.
    fn on_abandoned(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned();
        }
    }
}
