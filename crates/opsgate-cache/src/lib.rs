//! opsgate-cache - Response cache for the provider gateway
//!
//! A process-local key/value store with per-entry TTL, LRU eviction under
//! capacity pressure, and single-flight coalescing: while one upstream fetch
//! for a key is running, every other caller for that key waits for the same
//! outcome instead of issuing its own request.
//!
//! Nothing survives a restart and failed fetches are never stored.

mod config;
mod flight;
mod store;

pub use config::CacheConfig;
pub use flight::FlightError;
pub use store::{CacheEntry, CacheStats, CacheStore};
