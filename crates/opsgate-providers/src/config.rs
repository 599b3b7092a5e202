//! Backend connection configuration
//!
//! Credentials never appear in configuration files. [`AuthConfig`] only
//! names the environment variables that hold them.

use std::collections::BTreeMap;
use std::time::Duration;

use opsgate_core::BackendId;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::transport::Auth;

/// Connection settings for one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; GitHub and Azure fall back to their public endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// How requests authenticate
    #[serde(default)]
    pub auth: AuthConfig,
    /// Whole-request timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Connection timeout (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Items requested per page from list endpoints
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Maximum size of a returned build log tail (bytes)
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: usize,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_page_size() -> u32 {
    30
}

fn default_log_tail_bytes() -> usize {
    10_240
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth: AuthConfig::default(),
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            headers: BTreeMap::new(),
            page_size: default_page_size(),
            log_tail_bytes: default_log_tail_bytes(),
        }
    }
}

impl BackendConfig {
    /// Effective base URL for `backend`
    pub fn base_url(&self, backend: BackendId) -> Result<&str, ProviderError> {
        match (&self.base_url, backend) {
            (Some(url), _) => Ok(url.as_str()),
            (None, BackendId::Github) => Ok("https://api.github.com"),
            (None, BackendId::Azure) => Ok("https://management.azure.com"),
            (None, _) => Err(ProviderError::MissingSetting(format!(
                "{}.base_url",
                backend
            ))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Authentication scheme, referring to credentials by environment variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    /// `Authorization: Bearer <token>` (GitHub, Azure)
    Bearer { token_env: String },
    /// HTTP basic auth (Jenkins user + API token)
    Basic {
        username_env: String,
        token_env: String,
    },
    /// Arbitrary header (Artifactory `X-JFrog-Art-Api`)
    Header { name: String, value_env: String },
}

impl AuthConfig {
    /// Read the referenced credentials through `lookup`
    pub fn resolve<F>(&self, lookup: F) -> Result<Auth, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProviderError::MissingCredential(name.to_string()))
        };
        Ok(match self {
            AuthConfig::None => Auth::None,
            AuthConfig::Bearer { token_env } => Auth::Bearer(get(token_env)?),
            AuthConfig::Basic {
                username_env,
                token_env,
            } => Auth::Basic {
                username: get(username_env)?,
                token: get(token_env)?,
            },
            AuthConfig::Header { name, value_env } => Auth::Header {
                name: name.clone(),
                value: get(value_env)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_basic_auth_section() {
        let config: BackendConfig = toml::from_str(
            r#"
            base_url = "https://ci.example.com"
            log_tail_bytes = 4096

            [auth]
            type = "basic"
            username_env = "JENKINS_USER"
            token_env = "JENKINS_TOKEN"
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url(BackendId::Jenkins).unwrap(), "https://ci.example.com");
        assert_eq!(config.log_tail_bytes, 4096);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(
            config.auth,
            AuthConfig::Basic {
                username_env: "JENKINS_USER".into(),
                token_env: "JENKINS_TOKEN".into(),
            }
        );
    }

    #[test]
    fn public_endpoints_have_default_base_url() {
        let config = BackendConfig::default();
        assert_eq!(config.base_url(BackendId::Github).unwrap(), "https://api.github.com");
        assert!(config.base_url(BackendId::Artifactory).is_err());
    }

    #[test]
    fn resolve_reads_named_variables() {
        let auth = AuthConfig::Header {
            name: "X-JFrog-Art-Api".into(),
            value_env: "ARTIFACTORY_KEY".into(),
        }
        .resolve(|name| (name == "ARTIFACTORY_KEY").then(|| "secret".to_string()))
        .unwrap();

        assert_eq!(
            auth,
            Auth::Header {
                name: "X-JFrog-Art-Api".into(),
                value: "secret".into(),
            }
        );
    }

    #[test]
    fn resolve_fails_on_missing_or_empty_variable() {
        let config = AuthConfig::Bearer {
            token_env: "GITHUB_PERSONAL_ACCESS_TOKEN".into(),
        };
        let err = config.resolve(|_| None).unwrap_err();
        assert!(matches!(
            err,
            ProviderError::MissingCredential(ref v) if v == "GITHUB_PERSONAL_ACCESS_TOKEN"
        ));
        assert!(config.resolve(|_| Some(String::new())).is_err());
    }
}
