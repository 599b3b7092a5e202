//! Canned backend data for running without a config file

use std::sync::Arc;
use std::time::Duration;

use opsgate_core::BackendError;
use opsgate_gateway::{Gateway, GatewayConfig};
use opsgate_providers::{
    ArtifactoryAdapter, AzureAdapter, GithubAdapter, JenkinsAdapter, MockTransport,
};
use serde_json::json;

/// Simulated network latency of every demo backend
const LATENCY: Duration = Duration::from_millis(150);

/// Gateway with every backend served from canned data
pub fn gateway() -> Gateway {
    let mut gateway = Gateway::new(GatewayConfig::default());
    gateway.register_adapter(Arc::new(GithubAdapter::new(github())));
    gateway.register_adapter(Arc::new(JenkinsAdapter::new(jenkins())));
    gateway.register_adapter(Arc::new(AzureAdapter::new(azure())));
    gateway.register_adapter(Arc::new(ArtifactoryAdapter::new(artifactory())));
    gateway
}

fn github() -> Arc<MockTransport> {
    let mock = MockTransport::new().with_delay(LATENCY);
    mock.on_json(
        "/user",
        json!({
            "login": "demo-user",
            "name": "Demo User",
            "id": 1001,
            "type": "User",
            "html_url": "https://github.com/demo-user"
        }),
    )
    .on_json(
        "/repos/acme/gateway",
        json!({
            "full_name": "acme/gateway",
            "name": "gateway",
            "owner": {"login": "acme"},
            "description": "Demo repository",
            "default_branch": "main",
            "private": false,
            "stargazers_count": 42
        }),
    )
    .on_json(
        "/repos/acme/gateway/commits",
        json!([{
            "sha": "3f2c1a9",
            "html_url": "https://github.com/acme/gateway/commit/3f2c1a9",
            "commit": {
                "message": "Add retry budget",
                "author": {"name": "Demo User", "date": "2026-10-01T09:30:00Z"}
            }
        }]),
    )
    .on_json("/repos/acme/empty/commits", json!([]))
    .on_error("/repos/acme/missing", BackendError::http(404, "Not Found"));
    Arc::new(mock)
}

fn jenkins() -> Arc<MockTransport> {
    let mock = MockTransport::new().with_delay(LATENCY);
    mock.on_json(
        "/api/json",
        json!({
            "jobs": [{
                "name": "gateway-ci",
                "url": "https://ci.example.com/job/gateway-ci/",
                "color": "red",
                "lastBuild": {
                    "number": 17,
                    "result": "FAILURE",
                    "timestamp": 1_791_000_000_000_i64,
                    "url": "https://ci.example.com/job/gateway-ci/17/"
                }
            }],
            "views": [{"name": "all", "url": "https://ci.example.com/"}]
        }),
    )
    .on_text(
        "/job/gateway-ci/lastBuild/consoleText",
        "Started by timer\nRunning tests\nFinished: FAILURE\n",
    )
    .on_json("/queue/api/json", json!({"items": []}));
    Arc::new(mock)
}

fn azure() -> Arc<MockTransport> {
    let mock = MockTransport::new().with_delay(LATENCY);
    mock.on_json(
        "/subscriptions",
        json!({"value": [{
            "subscriptionId": "00000000-0000-0000-0000-000000000000",
            "displayName": "Demo subscription",
            "state": "Enabled"
        }]}),
    );
    Arc::new(mock)
}

fn artifactory() -> Arc<MockTransport> {
    let mock = MockTransport::new().with_delay(LATENCY);
    mock.on_json(
        "/api/storage/libs-release",
        json!({
            "repo": "libs-release",
            "path": "/",
            "children": [{"uri": "/com", "folder": true}]
        }),
    );
    Arc::new(mock)
}
