//! Raw backend failures and the canonical error taxonomy
//!
//! Adapters report [`BackendError`] values untouched. The gateway converts
//! them into a [`CanonicalError`] exactly once, through
//! [`crate::normalize::normalize`], before anything reaches a caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendId;

/// Result type for adapter operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A failure as reported by a backend adapter, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code
        status: u16,
        /// Message extracted from the response body, or the reason phrase
        message: String,
        /// Delay requested by the backend (`Retry-After`, `x-ratelimit-reset`)
        retry_after: Option<Duration>,
        /// The backend reported its request quota as exhausted
        rate_limit_exhausted: bool,
    },

    /// A backend-specific throttling signal outside plain HTTP status codes
    #[error("Throttled: {message}")]
    Throttled {
        /// Human-readable detail
        message: String,
        /// Delay requested by the backend
        retry_after: Option<Duration>,
    },

    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The backend could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Arguments were rejected before the backend was contacted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not known for this backend
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The response could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Shorthand for an HTTP failure without rate-limit metadata
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after: None,
            rate_limit_exhausted: false,
        }
    }

    /// The retry-after hint carried by this failure, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::Http { retry_after, .. }
            | BackendError::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Canonical error categories returned to every gateway caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    RateLimited,
    Unavailable,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    /// Whether a later attempt may succeed without any change by the caller
    pub fn is_retriable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Unavailable)
    }

    /// Returns the HTTP status code a front-end should use for this kind
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 403,
            ErrorKind::RateLimited => 429,
            ErrorKind::Unavailable => 503,
            ErrorKind::InvalidArgument => 400,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized, backend-agnostic error shape seen by gateway callers.
///
/// Built once per failure and immutable afterwards; `retriable` always agrees
/// with [`ErrorKind::is_retriable`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} from {backend}: {message}")]
pub struct CanonicalError {
    kind: ErrorKind,
    backend: BackendId,
    retriable: bool,
    message: String,
    #[serde(
        rename = "retry_after_ms",
        default,
        skip_serializing_if = "Option::is_none",
        with = "millis_opt"
    )]
    retry_after: Option<Duration>,
}

impl CanonicalError {
    pub fn new(kind: ErrorKind, backend: BackendId, message: impl Into<String>) -> Self {
        Self {
            kind,
            backend,
            retriable: kind.is_retriable(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a retry-after hint
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn backend(&self) -> BackendId {
        self.backend
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
