//! Error normalization
//!
//! Maps a raw [`BackendError`] onto the canonical taxonomy. The mapping is a
//! pure function of the backend and the raw error; [`classify`] exposes it
//! without side effects so the resilience layer can decide on retries, and
//! [`normalize`] builds the caller-facing [`CanonicalError`].

use std::time::Duration;

use crate::backend::BackendId;
use crate::error::{BackendError, CanonicalError, ErrorKind};

/// Determine the canonical kind of a raw error
pub fn classify(backend: BackendId, err: &BackendError) -> ErrorKind {
    match err {
        BackendError::Http {
            status,
            message,
            rate_limit_exhausted,
            ..
        } => match status {
            404 | 410 => ErrorKind::NotFound,
            401 => ErrorKind::Unauthorized,
            403 if *rate_limit_exhausted || is_github_rate_limit(backend, message) => {
                ErrorKind::RateLimited
            }
            403 => ErrorKind::Unauthorized,
            429 => ErrorKind::RateLimited,
            400 | 422 => ErrorKind::InvalidArgument,
            408 | 500..=599 => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        },
        BackendError::Throttled { .. } => ErrorKind::RateLimited,
        BackendError::Timeout(_) | BackendError::Connection(_) => ErrorKind::Unavailable,
        BackendError::InvalidArgument(_) | BackendError::UnknownOperation(_) => {
            ErrorKind::InvalidArgument
        }
        BackendError::Decode(_) | BackendError::Internal(_) => ErrorKind::Internal,
    }
}

/// Convert a raw error into its canonical form.
///
/// Internal errors are logged here with the full raw detail, since the
/// canonical message is all the caller will see.
pub fn normalize(backend: BackendId, err: &BackendError) -> CanonicalError {
    let kind = classify(backend, err);
    if kind == ErrorKind::Internal {
        tracing::error!(backend = %backend, error = ?err, "Unclassified backend error");
    }

    let retry_after = match kind {
        ErrorKind::RateLimited | ErrorKind::Unavailable => err.retry_after(),
        _ => None,
    };

    CanonicalError::new(kind, backend, err.to_string()).with_retry_after(retry_after)
}

/// Canonical error for a call refused by an open circuit
pub fn circuit_open(backend: BackendId, retry_after: Duration) -> CanonicalError {
    CanonicalError::new(
        ErrorKind::Unavailable,
        backend,
        format!("Circuit open for {}, retry in {}ms", backend, retry_after.as_millis()),
    )
    .with_retry_after(Some(retry_after))
}

fn is_github_rate_limit(backend: BackendId, message: &str) -> bool {
    backend == BackendId::Github && message.to_ascii_lowercase().contains("rate limit")
}
