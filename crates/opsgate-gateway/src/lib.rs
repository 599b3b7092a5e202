//! opsgate-gateway - Provider gateway dispatcher
//!
//! Ties the pieces together: every request is validated against the
//! adapter's operation catalog, served from the response cache when fresh,
//! and otherwise executed once per key under the backend's resilience
//! policy.
//!
//! # Architecture
//!
//! ```text
//! OperationRequest
//!        │
//!        ▼
//! ┌──────────────────────────────────────────────┐
//! │ Gateway                                      │
//! │  catalog → canonical args → cache key        │
//! │        │                                     │
//! │        ▼                                     │
//! │  CacheStore ── miss ──► ResiliencePolicy     │
//! │   (TTL/LRU,              (retry, breaker)    │
//! │    single-flight)              │             │
//! │                                ▼             │
//! │                        ProviderAdapter       │
//! └──────────────────────────────────────────────┘
//!        │
//!        ▼
//! Result<Value, CanonicalError>
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use opsgate_gateway::{Gateway, GatewayConfig};
//!
//! let mut gateway = Gateway::new(GatewayConfig::default());
//! gateway.register_adapter(github_adapter);
//!
//! let request = OperationRequest::new(BackendId::Github, "search_repositories")
//!     .arg("query", "tokio");
//! let repos = gateway.dispatch(request).await?;
//! ```

pub mod config;
pub mod gateway;

pub use config::{ConfigError, GatewayConfig};
pub use gateway::{normalize_outcome, BackendHealth, Gateway};
