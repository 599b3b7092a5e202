//! Gateway dispatcher
//!
//! The gateway is the single entry point for operation requests. For each
//! request it:
//! - resolves the adapter and catalog entry
//! - canonicalizes the arguments and derives the cache key
//! - serves fresh cached results, or runs one coalesced fetch per key
//!   through the backend's resilience policy
//! - normalizes every failure exactly once before returning it

use std::collections::HashMap;
use std::sync::Arc;

use opsgate_cache::{CacheStats, CacheStore, FlightError};
use opsgate_core::routing::{cache_key, key_prefix};
use opsgate_core::{
    circuit_open, normalize, BackendId, CanonicalArgs, CanonicalError, ErrorKind,
    OperationRequest, OperationSpec, ProviderAdapter, ProviderOutput,
};
use opsgate_resilience::{BreakerSnapshot, ResilienceError, ResiliencePolicy};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::config::GatewayConfig;

/// Health view of one registered backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealth {
    pub backend: BackendId,
    pub category: &'static str,
    pub operations: usize,
    pub breaker: BreakerSnapshot,
}

/// Routes operation requests to backend adapters
pub struct Gateway {
    config: GatewayConfig,
    adapters: HashMap<BackendId, Arc<dyn ProviderAdapter>>,
    cache: CacheStore<ProviderOutput, CanonicalError>,
    resilience: Arc<ResiliencePolicy>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let cache = CacheStore::with_negative_classifier(&config.cache, |output: &ProviderOutput| {
            output.confirmed_empty
        });
        let resilience = Arc::new(ResiliencePolicy::new(config.resilience.clone()));
        Self {
            config,
            adapters: HashMap::new(),
            cache,
            resilience,
        }
    }

    /// Register the adapter for its backend, replacing any previous one
    pub fn register_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let backend = adapter.backend();
        info!(
            backend = %backend,
            operations = adapter.operations().len(),
            "Registering backend adapter"
        );
        if self.adapters.insert(backend, adapter).is_some() {
            // Results of the replaced adapter must not be served
            self.cache.invalidate(&key_prefix(backend, None));
        }
    }

    /// Backends with a registered adapter, in declaration order
    pub fn backends(&self) -> Vec<BackendId> {
        BackendId::ALL
            .into_iter()
            .filter(|b| self.adapters.contains_key(b))
            .collect()
    }

    /// Operation catalog of a registered backend
    pub fn operations(&self, backend: BackendId) -> Option<&'static [OperationSpec]> {
        self.adapters.get(&backend).map(|a| a.operations())
    }

    /// Execute one operation request
    pub async fn dispatch(&self, request: OperationRequest) -> Result<Value, CanonicalError> {
        let span = info_span!(
            "dispatch",
            backend = %request.backend,
            operation = %request.operation,
            request_id = %request.request_id,
            requested_by = request.requested_by.as_deref().unwrap_or("-"),
        );
        self.dispatch_inner(request).instrument(span).await
    }

    async fn dispatch_inner(&self, request: OperationRequest) -> Result<Value, CanonicalError> {
        let backend = request.backend;
        let adapter = self.adapters.get(&backend).cloned().ok_or_else(|| {
            CanonicalError::new(
                ErrorKind::InvalidArgument,
                backend,
                format!("No adapter registered for backend '{}'", backend),
            )
        })?;
        let spec = adapter.operation(&request.operation).ok_or_else(|| {
            CanonicalError::new(
                ErrorKind::InvalidArgument,
                backend,
                format!("Unknown operation '{}' for backend '{}'", request.operation, backend),
            )
        })?;
        let args = spec
            .canonicalize(&request.args)
            .map_err(|err| normalize(backend, &err))?;

        let ttl = self.config.ttl_for(backend, spec);
        if ttl.is_zero() {
            debug!("Caching disabled for operation, calling backend");
            let output = invoke(&self.resilience, backend, &adapter, spec.name, &args).await?;
            return Ok(output.value);
        }

        let key = cache_key(backend, spec.name, &args);
        let policy = Arc::clone(&self.resilience);
        let operation = spec.name;
        let fetch = move || async move {
            invoke(&policy, backend, &adapter, operation, &args).await
        };

        match self.cache.get_or_fetch(&key, ttl, fetch).await {
            Ok(output) => Ok(output.value),
            Err(FlightError::Upstream(err)) => Err(err),
            Err(FlightError::Abandoned) => Err(CanonicalError::new(
                ErrorKind::Internal,
                backend,
                "Backend call ended without a result",
            )),
        }
    }

    /// Drop cached results for a backend, or for one of its operations
    pub fn invalidate(&self, backend: BackendId, operation: Option<&str>) -> usize {
        let removed = self.cache.invalidate(&key_prefix(backend, operation));
        info!(backend = %backend, operation, removed, "Cache invalidated");
        removed
    }

    /// Breaker state of every registered backend
    pub fn health(&self) -> Vec<BackendHealth> {
        self.backends()
            .into_iter()
            .filter_map(|backend| {
                let adapter = self.adapters.get(&backend)?;
                Some(BackendHealth {
                    backend,
                    category: backend.category(),
                    operations: adapter.operations().len(),
                    breaker: self.resilience.snapshot(backend),
                })
            })
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start the background expiry sweep, unless disabled in configuration
    pub fn spawn_cache_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.config.cache.sweep_interval()?;
        debug!(interval_ms = interval.as_millis() as u64, "Starting cache sweeper");
        Some(self.cache.spawn_sweeper(interval))
    }
}

/// One adapter call under the backend's resilience policy
async fn invoke(
    policy: &ResiliencePolicy,
    backend: BackendId,
    adapter: &Arc<dyn ProviderAdapter>,
    operation: &str,
    args: &CanonicalArgs,
) -> Result<ProviderOutput, CanonicalError> {
    policy
        .execute(backend, || adapter.invoke(operation, args))
        .await
        .map_err(|err| normalize_outcome(backend, err))
}

/// Canonical form of a failed policy run.
///
/// Exhausted retries surface as Unavailable and stay retriable, keeping the
/// last retry-after hint.
pub fn normalize_outcome(backend: BackendId, err: ResilienceError) -> CanonicalError {
    match err {
        ResilienceError::CircuitOpen {
            backend,
            retry_after,
        } => circuit_open(backend, retry_after),
        ResilienceError::Rejected(raw) => normalize(backend, &raw),
        ResilienceError::Exhausted { attempts, last } => {
            let last = normalize(backend, &last);
            CanonicalError::new(
                ErrorKind::Unavailable,
                backend,
                format!("Gave up after {} attempt(s): {}", attempts, last.message()),
            )
            .with_retry_after(last.retry_after())
        }
    }
}
