//! opsgate-providers - Backend adapters for the provider gateway
//!
//! Each adapter implements [`opsgate_core::ProviderAdapter`] for one DevOps
//! backend by issuing REST calls through a [`RestTransport`]. Adapters only
//! shape requests and responses: they never cache, retry or normalize
//! errors.
//!
//! - [`GithubAdapter`] - source control (api.github.com)
//! - [`JenkinsAdapter`] - CI server
//! - [`AzureAdapter`] - Azure Resource Manager
//! - [`ArtifactoryAdapter`] - artifact repository

pub mod artifactory;
pub mod azure;
pub mod config;
pub mod error;
pub mod github;
pub mod jenkins;
pub mod transport;

mod shape;

use std::sync::Arc;

use opsgate_core::{BackendId, ProviderAdapter};

pub use artifactory::ArtifactoryAdapter;
pub use azure::AzureAdapter;
pub use config::{AuthConfig, BackendConfig};
pub use error::ProviderError;
pub use github::GithubAdapter;
pub use jenkins::JenkinsAdapter;
pub use transport::{Auth, MockTransport, RestClient, RestTransport};

/// Build the adapter for `backend` on top of an existing transport
pub fn create_adapter(
    backend: BackendId,
    transport: Arc<dyn RestTransport>,
    config: &BackendConfig,
) -> Arc<dyn ProviderAdapter> {
    match backend {
        BackendId::Github => {
            Arc::new(GithubAdapter::new(transport).with_page_size(config.page_size))
        }
        BackendId::Jenkins => {
            Arc::new(JenkinsAdapter::new(transport).with_log_tail_bytes(config.log_tail_bytes))
        }
        BackendId::Azure => Arc::new(AzureAdapter::new(transport)),
        BackendId::Artifactory => Arc::new(ArtifactoryAdapter::new(transport)),
    }
}

/// Build a REST transport from configuration, resolving credentials from
/// the process environment
pub fn create_transport(
    backend: BackendId,
    config: &BackendConfig,
) -> Result<Arc<dyn RestTransport>, ProviderError> {
    let auth = config.auth.resolve(|name| std::env::var(name).ok())?;
    let client = RestClient::new(backend, config, auth)?;
    Ok(Arc::new(client))
}
