//! Response shaping helpers shared by the adapters

use opsgate_core::BackendError;
use serde_json::{Map, Value};

/// Build an object from `(output name, JSON pointer)` pairs.
///
/// Missing source fields become `null` so every item of a list has the
/// same keys.
pub(crate) fn select(source: &Value, fields: &[(&str, &str)]) -> Value {
    let object: Map<String, Value> = fields
        .iter()
        .map(|(name, pointer)| {
            let value = source.pointer(pointer).cloned().unwrap_or(Value::Null);
            (name.to_string(), value)
        })
        .collect();
    Value::Object(object)
}

/// The array at `pointer`, or nothing
pub(crate) fn items<'a>(source: &'a Value, pointer: &str) -> &'a [Value] {
    source
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Apply [`select`] to every item of the array at `pointer`
pub(crate) fn select_all(source: &Value, pointer: &str, fields: &[(&str, &str)]) -> Vec<Value> {
    items(source, pointer)
        .iter()
        .map(|item| select(item, fields))
        .collect()
}

/// Collect the string at `field` from every item of the array at `pointer`
pub(crate) fn strings(source: &Value, pointer: &str, field: &str) -> Vec<Value> {
    items(source, pointer)
        .iter()
        .filter_map(|item| item.pointer(field).cloned())
        .collect()
}

/// Whether `err` is an HTTP failure with `status` whose message mentions `needle`
pub(crate) fn http_matches(err: &BackendError, status: u16, needle: &str) -> bool {
    matches!(
        err,
        BackendError::Http { status: s, message, .. }
            if *s == status && message.to_lowercase().contains(&needle.to_lowercase())
    )
}

/// Replace the message of an HTTP failure with `status`, keeping its metadata
pub(crate) fn reword(
    err: BackendError,
    status: u16,
    message: impl FnOnce() -> String,
) -> BackendError {
    match err {
        BackendError::Http {
            status: s,
            retry_after,
            rate_limit_exhausted,
            ..
        } if s == status => BackendError::Http {
            status: s,
            message: message(),
            retry_after,
            rate_limit_exhausted,
        },
        other => other,
    }
}
