//! Retry delay computation
//!
//! Kept free of clocks and randomness so every branch can be exercised with
//! synthetic inputs.

use std::time::Duration;

use opsgate_core::ErrorKind;

use crate::config::PolicyConfig;

/// Delay before retrying after failed attempt number `attempt` (zero-based),
/// or `None` when the failure must not be retried.
///
/// The exponential delay `base * 2^attempt` is jittered by up to
/// `config.jitter` in either direction and capped at `max_delay`.
/// `jitter_sample` is a uniform value in `[0, 1]`; 0.5 means no jitter.
///
/// A retry-after hint is a lower bound on the delay. A hint longer than
/// `max_retry_after` ends retrying.
pub fn retry_delay(
    config: &PolicyConfig,
    attempt: u32,
    kind: ErrorKind,
    retry_after: Option<Duration>,
    jitter_sample: f64,
) -> Option<Duration> {
    if !kind.is_retriable() {
        return None;
    }

    let max_ms = config.max_delay_ms;
    let exp_ms = 1u64
        .checked_shl(attempt)
        .map_or(u64::MAX, |factor| config.base_delay_ms.saturating_mul(factor))
        .min(max_ms);

    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = 1.0 + jitter * (2.0 * jitter_sample.clamp(0.0, 1.0) - 1.0);
    let jittered_ms = ((exp_ms as f64) * factor).round() as u64;
    let delay = Duration::from_millis(jittered_ms.min(max_ms));

    match retry_after {
        Some(hint) if hint > config.max_retry_after() => None,
        Some(hint) => Some(delay.max(hint)),
        None => Some(delay),
    }
}
