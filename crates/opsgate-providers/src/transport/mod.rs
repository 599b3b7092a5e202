//! REST transport seam
//!
//! Adapters talk to their backend only through [`RestTransport`]:
//! - [`RestClient`] issues real requests with `reqwest`
//! - [`MockTransport`] replays scripted responses in tests

mod mock;
mod rest;

pub use mock::{MockTransport, RecordedRequest};
pub use rest::RestClient;

use async_trait::async_trait;
use opsgate_core::BackendResult;
use serde_json::Value;

/// Query string pairs
pub type Query<'a> = &'a [(&'a str, String)];

/// Minimal read-only REST interface used by the adapters.
///
/// `path` is relative to the backend's base URL and starts with `/`.
/// Non-success responses come back as [`opsgate_core::BackendError::Http`].
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// GET a JSON document
    async fn get_json(&self, path: &str, query: Query<'_>) -> BackendResult<Value>;

    /// GET a plain-text document
    async fn get_text(&self, path: &str, query: Query<'_>) -> BackendResult<String>;
}

/// Resolved credentials
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Bearer(String),
    Basic { username: String, token: String },
    Header { name: String, value: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
            Auth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
            Auth::Header { name, .. } => write!(f, "Header({}: ***)", name),
        }
    }
}

/// Percent-encode one URL path segment.
///
/// ```
/// # use opsgate_providers::transport::encode_segment;
/// assert_eq!(encode_segment("my job"), "my%20job");
/// assert_eq!(encode_segment("a/b"), "a%2Fb");
/// ```
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Percent-encode a `/`-separated path, keeping the separators
pub fn encode_path(raw: &str) -> String {
    raw.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
