//! Resilience wrapper: retry with backoff composed with circuit breaking
//!
//! [`ResilienceWrapper::call`] is the single entry point every remote
//! operation goes through. The breaker is consulted once per attempt, so an
//! open circuit short-circuits remaining retries instead of sleeping
//! through them.

pub mod circuit;
pub mod retry;

pub use circuit::{
    BreakerRegistry, CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use retry::RetryPolicy;

use crate::error::EngineResult;
use crate::remote::target::TargetKey;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct ResilienceWrapper {
    retry: RetryPolicy,
    breakers: Arc<BreakerRegistry>,
}

impl ResilienceWrapper {
    pub fn new(retry: RetryPolicy, breakers: Arc<BreakerRegistry>) -> Self {
        Self { retry, breakers }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run a remote operation under the target's breaker and the retry
    /// policy. The operation is re-invoked from scratch on each attempt.
    pub async fn call<T, F, Fut>(&self, key: &TargetKey, operation: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let breaker = self.breakers.breaker_for(key);
        let mut attempt = 0;

        loop {
            attempt += 1;
            breaker.try_acquire()?;

            let started = Instant::now();
            match operation().await {
                Ok(value) => {
                    breaker.record_success(started.elapsed());
                    return Ok(value);
                }
                Err(err) => {
                    breaker.record_failure();

                    if !err.is_transient() || attempt >= self.retry.max_attempts {
                        return Err(err);
                    }

                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        target = %key,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        ?delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
