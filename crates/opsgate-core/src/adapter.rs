//! ProviderAdapter trait - the seam between the gateway and each backend

use async_trait::async_trait;

use crate::backend::BackendId;
use crate::catalog::{find_operation, CanonicalArgs, OperationSpec};
use crate::error::BackendResult;
use crate::models::ProviderOutput;

/// A backend adapter.
///
/// Adapters translate a named operation into backend calls and report raw
/// results or raw [`crate::BackendError`]s. They hold nothing but their
/// transport handle: caching, retrying and error normalization all happen
/// in the gateway.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Backend this adapter serves
    fn backend(&self) -> BackendId;

    /// Static catalog of supported operations
    fn operations(&self) -> &'static [OperationSpec];

    /// Execute one operation with validated arguments
    async fn invoke(&self, operation: &str, args: &CanonicalArgs) -> BackendResult<ProviderOutput>;

    /// Look up a single catalog entry
    fn operation(&self, name: &str) -> Option<&'static OperationSpec> {
        find_operation(self.operations(), name)
    }
}
