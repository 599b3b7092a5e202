//! Adapter output model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A successful adapter result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// JSON payload returned to the caller
    pub value: Value,
    /// The backend positively confirmed there is nothing here
    #[serde(default)]
    pub confirmed_empty: bool,
}

impl ProviderOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            confirmed_empty: false,
        }
    }

    /// An explicit empty result, e.g. a repository with no commits
    pub fn empty_list() -> Self {
        Self {
            value: Value::Array(Vec::new()),
            confirmed_empty: true,
        }
    }

    /// Wrap a list payload, flagging it as confirmed-empty when it has no items
    pub fn from_list(items: Vec<Value>) -> Self {
        let confirmed_empty = items.is_empty();
        Self {
            value: Value::Array(items),
            confirmed_empty,
        }
    }
}
