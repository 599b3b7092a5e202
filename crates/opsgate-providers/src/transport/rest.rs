//! reqwest-based transport

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opsgate_core::{BackendError, BackendId, BackendResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{Auth, Query, RestTransport};
use crate::config::BackendConfig;
use crate::error::ProviderError;

const USER_AGENT: &str = concat!("opsgate/", env!("CARGO_PKG_VERSION"));

/// Longest body excerpt kept as an error message
const MAX_MESSAGE_LEN: usize = 300;

/// REST client for one backend
#[derive(Debug, Clone)]
pub struct RestClient {
    backend: BackendId,
    client: Client,
    base_url: Url,
    auth: Auth,
}

impl RestClient {
    pub fn new(
        backend: BackendId,
        config: &BackendConfig,
        auth: Auth,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProviderError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProviderError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, value);
        }
        if let Auth::Header { name, value } = &auth {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProviderError::InvalidHeader(format!("{}: {}", name, e)))?;
            let mut value = HeaderValue::from_str(value)
                .map_err(|_| ProviderError::InvalidHeader(format!("{}: invalid value", name)))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .default_headers(headers)
            .build()?;

        let base_url = Url::parse(config.base_url(backend)?)?;
        debug!(backend = %backend, base_url = %base_url, "REST client created");

        Ok(Self {
            backend,
            client,
            base_url,
            auth,
        })
    }

    fn url(&self, path: &str, query: Query<'_>) -> BackendResult<Url> {
        let joined = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| BackendError::InvalidArgument(format!("Invalid path '{}': {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, token } => request.basic_auth(username, Some(token)),
            Auth::None | Auth::Header { .. } => request,
        }
    }

    #[instrument(skip(self, query), fields(backend = %self.backend))]
    async fn send(&self, path: &str, query: Query<'_>) -> BackendResult<Response> {
        let url = self.url(path, query)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        debug!(status = status.as_u16(), "Backend responded");
        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

#[async_trait]
impl RestTransport for RestClient {
    async fn get_json(&self, path: &str, query: Query<'_>) -> BackendResult<Value> {
        self.send(path, query)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn get_text(&self, path: &str, query: Query<'_>) -> BackendResult<String> {
        self.send(path, query)
            .await?
            .text()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

fn request_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        BackendError::Connection(err.to_string())
    } else if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Internal(err.to_string())
    }
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();

    let message = extract_message(&body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    BackendError::Http {
        status: status.as_u16(),
        message,
        retry_after: retry_after(&headers, Utc::now()),
        rate_limit_exhausted: rate_limit_exhausted(&headers),
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands GitHub (`message`), Azure (`error.message`) and Artifactory
/// (`errors[0].message`) shapes, and falls back to a plain-text excerpt.
pub(crate) fn extract_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.get("message"),
            json.pointer("/error/message"),
            json.pointer("/errors/0/message"),
            json.get("error"),
        ];
        if let Some(msg) = candidates.into_iter().flatten().find_map(Value::as_str) {
            return Some(msg.to_string());
        }
    }

    // HTML error pages carry nothing useful
    if body.starts_with('<') {
        return None;
    }
    Some(body.chars().take(MAX_MESSAGE_LEN).collect())
}

/// Delay requested by the backend, from `Retry-After` (seconds or HTTP date)
/// or, once the quota is spent, from `x-ratelimit-reset` (epoch seconds)
pub(crate) fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(value) = header_str(headers, RETRY_AFTER.as_str()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            return Some(
                (at.with_timezone(&Utc) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            );
        }
    }

    if rate_limit_exhausted(headers) {
        let reset = header_str(headers, "x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
        let wait = reset - now.timestamp();
        return Some(Duration::from_secs(wait.max(0) as u64));
    }

    None
}

pub(crate) fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    header_str(headers, "x-ratelimit-remaining").is_some_and(|v| v.trim() == "0")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
