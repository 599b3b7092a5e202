//! Adapter construction errors

use thiserror::Error;

/// Errors raised while building transports and adapters
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid base URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A setting with no default was not provided
    #[error("Missing setting: {0}")]
    MissingSetting(String),

    /// The environment variable holding a credential is unset
    #[error("Credential environment variable '{0}' is not set")]
    MissingCredential(String),

    /// A header name or value is not valid HTTP
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
