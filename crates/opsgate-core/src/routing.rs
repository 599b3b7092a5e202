//! Cache key construction
//!
//! Keys have the shape `backend:operation:k1=v1&k2=v2`. Argument names come
//! from the static catalogs; values are escaped for `%`, `&` and `=` so two
//! different argument sets can never render to the same key.

use crate::backend::BackendId;
use crate::catalog::CanonicalArgs;

/// Build the cache key for a canonicalized request
///
/// ```
/// # use opsgate_core::{BackendId, CanonicalArgs, routing::cache_key};
/// let args: CanonicalArgs = [("repo", "gw"), ("owner", "acme")].into_iter().collect();
/// assert_eq!(
///     cache_key(BackendId::Github, "get_repository", &args),
///     "github:get_repository:owner=acme&repo=gw"
/// );
/// ```
pub fn cache_key(backend: BackendId, operation: &str, args: &CanonicalArgs) -> String {
    let mut key = key_prefix(backend, Some(operation));
    for (i, (name, value)) in args.iter().enumerate() {
        if i > 0 {
            key.push('&');
        }
        key.push_str(&escape_component(name));
        key.push('=');
        key.push_str(&escape_component(value));
    }
    key
}

/// Prefix shared by every key of a backend, or of one of its operations.
///
/// Used for targeted invalidation.
///
/// ```
/// # use opsgate_core::{BackendId, routing::key_prefix};
/// assert_eq!(key_prefix(BackendId::Jenkins, None), "jenkins:");
/// assert_eq!(key_prefix(BackendId::Jenkins, Some("get_jobs")), "jenkins:get_jobs:");
/// ```
pub fn key_prefix(backend: BackendId, operation: Option<&str>) -> String {
    match operation {
        Some(op) => format!("{}:{}:", backend, op),
        None => format!("{}:", backend),
    }
}

/// Percent-escape the characters that carry meaning inside a key
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}
