//! Retry loop and breaker registry

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use opsgate_core::{classify, BackendId, BackendResult};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::backoff::retry_delay;
use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::{PolicyConfig, ResilienceConfig};
use crate::error::ResilienceError;

/// Applies retries, rate-limit backoff and circuit breaking per backend
pub struct ResiliencePolicy {
    config: ResilienceConfig,
    breakers: Mutex<HashMap<BackendId, Arc<CircuitBreaker>>>,
}

impl ResiliencePolicy {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config_for(&self, backend: BackendId) -> &PolicyConfig {
        self.config.for_backend(backend)
    }

    fn breaker(&self, backend: BackendId) -> Arc<CircuitBreaker> {
        let config = self.config.for_backend(backend);
        Arc::clone(self.breakers.lock().entry(backend).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                backend,
                config.failure_threshold,
                config.cooldown(),
            ))
        }))
    }

    /// Run `call` under the backend's policy.
    ///
    /// Retriable failures are retried up to `max_attempts` in total, each
    /// attempt first asking the circuit breaker for admission. Non-retriable
    /// failures return at once and count as a success for the breaker,
    /// since the backend evidently answered.
    pub async fn execute<T, F, Fut>(
        &self,
        backend: BackendId,
        mut call: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let config = self.config.for_backend(backend);
        let breaker = self.breaker(backend);
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let permit = breaker
                .try_acquire()
                .map_err(|retry_after| ResilienceError::CircuitOpen {
                    backend,
                    retry_after,
                })?;

            let err = match call().await {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = classify(backend, &err);
            if !kind.is_retriable() {
                permit.success();
                debug!(backend = %backend, kind = %kind, "Non-retriable backend failure");
                return Err(ResilienceError::Rejected(err));
            }
            let circuit_open = permit.failure();
            attempt += 1;

            if attempt >= max_attempts {
                warn!(backend = %backend, attempts = attempt, error = %err, "Retries exhausted");
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            if circuit_open {
                warn!(
                    backend = %backend,
                    attempts = attempt,
                    error = %err,
                    "Circuit open, not retrying"
                );
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let sample: f64 = rand::thread_rng().gen();
            let Some(delay) = retry_delay(config, attempt - 1, kind, err.retry_after(), sample)
            else {
                warn!(
                    backend = %backend,
                    retry_after_ms = err.retry_after().map(|d| d.as_millis() as u64),
                    "Retry-after beyond limit, not retrying"
                );
                return Err(ResilienceError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };

            warn!(
                backend = %backend,
                attempt,
                kind = %kind,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying backend call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Breaker state for health reporting
    pub fn snapshot(&self, backend: BackendId) -> BreakerSnapshot {
        self.breaker(backend).snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use opsgate_core::BackendError;
    use tokio::time::Instant;

    use crate::breaker::CircuitState;

    fn policy(max_attempts: u32, failure_threshold: u32) -> ResiliencePolicy {
        ResiliencePolicy::new(ResilienceConfig {
            default: PolicyConfig {
                max_attempts,
                base_delay_ms: 100,
                max_delay_ms: 1_000,
                jitter: 0.0,
                failure_threshold,
                cooldown_ms: 10_000,
                ..PolicyConfig::default()
            },
            backends: HashMap::new(),
        })
    }

    async fn run(
        policy: &ResiliencePolicy,
        calls: &AtomicU32,
        result: BackendResult<&'static str>,
    ) -> Result<&'static str, ResilienceError> {
        policy
            .execute(BackendId::Jenkins, || {
                calls.fetch_add(1, Ordering::SeqCst);
                let result = result.clone();
                async move { result }
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn success_needs_one_call() {
        let policy = policy(3, 5);
        let calls = AtomicU32::new(0);
        assert_eq!(run(&policy, &calls, Ok("jobs")).await, Ok("jobs"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_failure_makes_exactly_max_attempts_calls() {
        let policy = policy(3, 10);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = run(&policy, &calls, Err(BackendError::http(503, "down"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 3, .. })
        ));
        // 100ms + 200ms of backoff between the three attempts
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retriable_failure_is_not_retried() {
        let policy = policy(3, 1);
        let calls = AtomicU32::new(0);

        let result = run(&policy, &calls, Err(BackendError::http(404, "missing"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ResilienceError::Rejected(_))));
        // Counted as a success: the circuit stays closed even at threshold 1
        assert_eq!(policy.snapshot(BackendId::Jenkins).state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_minimum_sleep() {
        let policy = policy(2, 10);
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .execute(BackendId::Github, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(BackendError::Http {
                            status: 429,
                            message: "slow down".into(),
                            retry_after: Some(Duration::from_secs(30)),
                            rate_limit_exhausted: false,
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(1));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn excessive_retry_after_surfaces_immediately() {
        let policy = policy(3, 10);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = run(
            &policy,
            &calls,
            Err(BackendError::Http {
                status: 429,
                message: "quota".into(),
                retry_after: Some(Duration::from_secs(3600)),
                rate_limit_exhausted: false,
            }),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ResilienceError::Exhausted { attempts: 1, .. })
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_fails_fast_then_probes_after_cooldown() {
        let policy = policy(1, 2);
        let calls = AtomicU32::new(0);
        let down = || Err(BackendError::Connection("refused".into()));

        run(&policy, &calls, down()).await.unwrap_err();
        run(&policy, &calls, down()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let result = run(&policy, &calls, Ok("up")).await;
        assert!(matches!(
            result,
            Err(ResilienceError::CircuitOpen { retry_after, .. })
                if retry_after == Duration::from_secs(10)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(run(&policy, &calls, Ok("up")).await, Ok("up"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let snap = policy.snapshot(BackendId::Jenkins);
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opening_mid_retry_returns_last_failure_without_sleeping() {
        let policy = policy(3, 1);
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let throttled = BackendError::Http {
            status: 429,
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(10)),
            rate_limit_exhausted: true,
        };

        let result = run(&policy, &calls, Err(throttled.clone())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(
            result,
            Err(ResilienceError::Exhausted {
                attempts: 1,
                last: throttled,
            })
        );
        assert_eq!(policy.snapshot(BackendId::Jenkins).state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn breakers_are_per_backend() {
        let policy = policy(1, 1);
        let calls = AtomicU32::new(0);
        run(&policy, &calls, Err(BackendError::Timeout("slow".into())))
            .await
            .unwrap_err();

        assert_eq!(policy.snapshot(BackendId::Jenkins).state, CircuitState::Open);
        assert_eq!(policy.snapshot(BackendId::Azure).state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_returns_breaker_to_open() {
        let policy = Arc::new(policy(1, 1));
        let calls = AtomicU32::new(0);
        run(&policy, &calls, Err(BackendError::Timeout("slow".into())))
            .await
            .unwrap_err();
        tokio::time::advance(Duration::from_secs(10)).await;

        let hanging = {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move {
                policy
                    .execute(BackendId::Jenkins, || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok::<_, BackendError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(policy.snapshot(BackendId::Jenkins).state, CircuitState::HalfOpen);

        hanging.abort();
        let _ = hanging.await;

        assert_eq!(policy.snapshot(BackendId::Jenkins).state, CircuitState::Open);
        assert_eq!(run(&policy, &calls, Ok("up")).await, Ok("up"));
    }
}
