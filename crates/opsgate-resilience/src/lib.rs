//! opsgate-resilience - Resilience policy for backend calls
//!
//! Wraps every adapter call with:
//! - retries with exponential backoff and jitter for retriable failures
//! - rate-limit backoff that honours the backend's retry-after hint
//! - a circuit breaker per backend that fails fast while the backend is down
//!
//! The policy classifies raw errors with [`opsgate_core::classify`] but
//! returns them unnormalized; turning them into canonical errors is the
//! caller's job.

mod backoff;
mod breaker;
mod config;
mod error;
mod policy;

pub use backoff::retry_delay;
pub use breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{PolicyConfig, ResilienceConfig};
pub use error::ResilienceError;
pub use policy::ResiliencePolicy;
