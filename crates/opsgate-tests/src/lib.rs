//! Integration tests for the provider gateway
//!
//! These tests run the full dispatch path (catalog validation, cache,
//! resilience policy, adapters) against mock transports, with tokio's clock
//! paused so that backoff, cooldown and expiry are deterministic.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p opsgate-tests
//! ```
//!
//! # Test Structure
//!
//! - `dispatch_test.rs` - Caching, coalescing and argument canonicalization
//! - `resilience_test.rs` - Retries, rate limits and circuit breaking

// This crate only contains tests, no library code
