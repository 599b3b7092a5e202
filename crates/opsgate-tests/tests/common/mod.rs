//! Shared harness: a gateway wired to mock GitHub and Jenkins transports

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opsgate_cache::CacheConfig;
use opsgate_gateway::{Gateway, GatewayConfig};
use opsgate_providers::{GithubAdapter, JenkinsAdapter, MockTransport};
use opsgate_resilience::{PolicyConfig, ResilienceConfig};
use serde_json::{json, Value};

pub const REPO_PATH: &str = "/repos/acme/gateway";

pub struct Harness {
    pub gateway: Gateway,
    pub github: Arc<MockTransport>,
    pub jenkins: Arc<MockTransport>,
}

/// Deterministic policy: no jitter, short backoff
pub fn policy() -> PolicyConfig {
    PolicyConfig {
        max_attempts: 3,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
        jitter: 0.0,
        max_retry_after_ms: 60_000,
        failure_threshold: 5,
        cooldown_ms: 10_000,
    }
}

pub fn config(policy: PolicyConfig) -> GatewayConfig {
    GatewayConfig {
        cache: CacheConfig {
            capacity: 64,
            negative_ttl_ms: 5_000,
            sweep_interval_ms: 0,
        },
        resilience: ResilienceConfig {
            default: policy,
            backends: HashMap::new(),
        },
        ttl: HashMap::new(),
    }
}

impl Harness {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_latency(config, None)
    }

    /// Every mock reply is delayed by `latency`
    pub fn with_latency(config: GatewayConfig, latency: Option<Duration>) -> Self {
        let (github, jenkins) = match latency {
            Some(latency) => (
                MockTransport::new().with_delay(latency),
                MockTransport::new().with_delay(latency),
            ),
            None => (MockTransport::new(), MockTransport::new()),
        };
        let github = Arc::new(github);
        let jenkins = Arc::new(jenkins);

        let mut gateway = Gateway::new(config);
        gateway.register_adapter(Arc::new(GithubAdapter::new(github.clone())));
        gateway.register_adapter(Arc::new(JenkinsAdapter::new(jenkins.clone())));

        Self {
            gateway,
            github,
            jenkins,
        }
    }
}

pub fn repository() -> Value {
    json!({
        "full_name": "acme/gateway",
        "name": "gateway",
        "owner": {"login": "acme"},
        "default_branch": "main",
        "private": false
    })
}
