//! Operation request model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BackendId;

/// A logical operation addressed to one backend.
///
/// Arguments are kept in an ordered map so that two requests built from the
/// same arguments in different orders are indistinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Target backend
    pub backend: BackendId,
    /// Operation name from the backend's catalog
    pub operation: String,
    /// Raw, not yet validated arguments
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
    /// Identity of the caller, for logging only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// Correlation ID recorded on the dispatch span
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
}

impl OperationRequest {
    pub fn new(backend: BackendId, operation: impl Into<String>) -> Self {
        Self {
            backend,
            operation: operation.into(),
            args: BTreeMap::new(),
            requested_by: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Add an argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Record who issued the request
    pub fn requested_by(mut self, who: impl Into<String>) -> Self {
        self.requested_by = Some(who.into());
        self
    }
}
