//! Gateway configuration
//!
//! ```toml
//! [cache]
//! capacity = 2048
//! negative_ttl_ms = 30000
//!
//! [resilience]
//! max_attempts = 4
//!
//! [resilience.backends.github]
//! failure_threshold = 3
//!
//! # Per-operation TTL overrides in seconds (0 disables caching)
//! [ttl.jenkins]
//! get_queue = 15
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use opsgate_cache::CacheConfig;
use opsgate_core::{BackendId, OperationSpec};
use opsgate_resilience::ResilienceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// TTL overrides in seconds, by backend then operation
    #[serde(default)]
    pub ttl: HashMap<BackendId, BTreeMap<String, u64>>,
}

impl GatewayConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Effective TTL: the configured override, else the catalog default
    pub fn ttl_for(&self, backend: BackendId, operation: &OperationSpec) -> Duration {
        self.ttl
            .get(&backend)
            .and_then(|table| table.get(operation.name))
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| operation.default_ttl())
    }
}
