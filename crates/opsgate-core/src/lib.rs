//! opsgate-core - Core traits and types for the provider gateway
//!
//! This crate provides the fundamental abstractions shared by every layer of
//! the gateway: the backend identifiers, the raw and canonical error types,
//! the operation catalog used to validate and canonicalize arguments, and the
//! [`ProviderAdapter`] trait that each DevOps backend implements.

pub mod adapter;
pub mod backend;
pub mod catalog;
pub mod error;
pub mod models;
pub mod normalize;
pub mod routing;

pub use adapter::ProviderAdapter;
pub use backend::BackendId;
pub use catalog::{find_operation, ArgKind, ArgSpec, CanonicalArgs, OperationSpec};
pub use error::{BackendError, BackendResult, CanonicalError, ErrorKind};
pub use models::*;
pub use normalize::{circuit_open, classify, normalize};
