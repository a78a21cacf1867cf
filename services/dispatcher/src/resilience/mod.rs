//! Retry and circuit-breaking policies composed around the outbox publish.
//!
//! ```text
//! retry.run(|attempt| breaker.call(timeout(publish_all_targets)))
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{RetryPolicy, Retryable};
