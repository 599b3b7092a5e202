//! In-flight fetch bookkeeping

use thiserror::Error;
use tokio::sync::watch;

/// Failure delivered to the callers of a coalesced fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError<E> {
    /// The fetch itself failed; every waiter receives the same error
    #[error("{0}")]
    Upstream(E),

    /// The fetch task ended without producing an outcome (it panicked or
    /// the runtime shut it down)
    #[error("Fetch abandoned before completion")]
    Abandoned,
}

pub(crate) type Outcome<V, E> = Result<V, FlightError<E>>;

/// Registry record for a running fetch
pub(crate) struct Flight<V, E> {
    pub(crate) id: u64,
    pub(crate) rx: watch::Receiver<Option<Outcome<V, E>>>,
    /// Cleared when the key is invalidated mid-flight, so a result fetched
    /// before the invalidation is delivered but not stored
    pub(crate) populate: bool,
}

/// Wait for a flight's outcome
pub(crate) async fn wait<V: Clone, E: Clone>(
    mut rx: watch::Receiver<Option<Outcome<V, E>>>,
) -> Outcome<V, E> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().as_ref() {
            return outcome.clone();
        }
        if rx.changed().await.is_err() {
            // Sender dropped; it may still have published right before
            return rx
                .borrow()
                .as_ref()
                .cloned()
                .unwrap_or(Err(FlightError::Abandoned));
        }
    }
}
