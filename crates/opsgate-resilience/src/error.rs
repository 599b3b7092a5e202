//! Resilience outcome errors

use std::time::Duration;

use opsgate_core::{BackendError, BackendId};
use thiserror::Error;

/// Why a call through the policy did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    /// The backend's circuit is open; the adapter was not called
    #[error("Circuit open for {backend}, retry in {}ms", .retry_after.as_millis())]
    CircuitOpen {
        backend: BackendId,
        retry_after: Duration,
    },

    /// The backend answered with a non-retriable failure
    #[error(transparent)]
    Rejected(BackendError),

    /// Retriable failures persisted past the retry budget
    #[error("Gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: BackendError },
}
