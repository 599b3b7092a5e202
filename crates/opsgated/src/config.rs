//! Daemon configuration file
//!
//! Gateway settings at the top level plus one `[backends.<id>]` section per
//! backend to enable:
//!
//! ```toml
//! [cache]
//! capacity = 2048
//!
//! [backends.github.auth]
//! type = "bearer"
//! token_env = "GITHUB_PERSONAL_ACCESS_TOKEN"
//!
//! [backends.jenkins]
//! base_url = "https://ci.example.com"
//! log_tail_bytes = 20480
//!
//! [backends.jenkins.auth]
//! type = "basic"
//! username_env = "JENKINS_USER"
//! token_env = "JENKINS_TOKEN"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use opsgate_core::BackendId;
use opsgate_gateway::GatewayConfig;
use opsgate_providers::BackendConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backends: BTreeMap<BackendId, BackendConfig>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}
