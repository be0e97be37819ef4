//! Retry and circuit-breaker properties over the pool seam

mod common;

use common::target;
use futures::future::BoxFuture;
use rigger::config::PoolConfig;
use rigger::error::{EngineError, EngineResult};
use rigger::remote::{MockTransport, PooledSession, SessionPool};
use rigger::resilience::{
    BreakerRegistry, CircuitBreakerConfig, CircuitState, ResilienceWrapper, RetryPolicy,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        window_size: 10,
        minimum_calls: 3,
        failure_rate_threshold: 0.5,
        wait_duration: Duration::from_millis(60),
        permitted_half_open_calls: 2,
        ..CircuitBreakerConfig::default()
    }
}

/// A reusable acquire operation for the wrapper: each attempt borrows a
/// fresh session from the shared pool.
fn acquire_op(
    pool: &Arc<SessionPool>,
) -> impl Fn() -> BoxFuture<'static, EngineResult<PooledSession>> {
    let pool = Arc::clone(pool);
    move || {
        let pool = Arc::clone(&pool);
        Box::pin(async move { pool.acquire(&target()).await })
    }
}

#[test]
fn retry_policy_produces_exact_delay_sequence() {
    // maxAttempts=3, backoff=1s, multiplier=2.0: sleep 1s after the first
    // failure, 2s after the second, then the third attempt surfaces.
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_secs(1),
        multiplier: 2.0,
        ..RetryPolicy::default()
    };
    assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
    assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
}

#[tokio::test]
async fn retry_surfaces_error_after_exact_attempt_count() {
    let wrapper = ResilienceWrapper::new(
        fast_retry(3),
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default())),
    );
    let attempts = Arc::new(AtomicU32::new(0));

    let attempts_in = Arc::clone(&attempts);
    let result: EngineResult<()> = wrapper
        .call(&target().key(), move || {
            let attempts = Arc::clone(&attempts_in);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Connection("reset".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(EngineError::Connection(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn open_breaker_blocks_acquire_without_network_attempt() {
    let transport = MockTransport::new();
    let pool = SessionPool::new(
        Arc::new(transport.clone()),
        PoolConfig {
            max_size: 2,
            borrow_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        },
    );
    let breakers = Arc::new(BreakerRegistry::new(breaker_config()));
    let wrapper = ResilienceWrapper::new(fast_retry(1), Arc::clone(&breakers));

    // Three failed connects trip the breaker.
    transport.fail_connects(3);
    for _ in 0..3 {
        let result = wrapper.call(&target().key(), acquire_op(&pool)).await;
        assert!(result.is_err());
    }
    assert_eq!(transport.connect_count(), 3);
    assert!(matches!(
        breakers.breaker_for(&target().key()).state(),
        CircuitState::Open { .. }
    ));

    // With the breaker open, acquire fails fast: no further connect attempt.
    let result = wrapper.call(&target().key(), acquire_op(&pool)).await;
    assert!(matches!(result, Err(EngineError::CircuitOpen { .. })));
    assert_eq!(transport.connect_count(), 3);
}

#[tokio::test]
async fn half_open_probes_then_recloses() {
    let transport = MockTransport::new();
    let pool = SessionPool::new(
        Arc::new(transport.clone()),
        PoolConfig {
            max_size: 4,
            borrow_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        },
    );
    let breakers = Arc::new(BreakerRegistry::new(breaker_config()));
    let wrapper = ResilienceWrapper::new(fast_retry(1), Arc::clone(&breakers));

    transport.fail_connects(3);
    for _ in 0..3 {
        let _ = wrapper.call(&target().key(), acquire_op(&pool)).await;
    }
    assert!(matches!(
        breakers.breaker_for(&target().key()).state(),
        CircuitState::Open { .. }
    ));

    // After the wait duration, exactly the permitted trial calls are
    // admitted; both succeed, so the breaker closes again.
    tokio::time::sleep(Duration::from_millis(80)).await;
    for _ in 0..2 {
        let mut session = wrapper
            .call(&target().key(), acquire_op(&pool))
            .await
            .unwrap();
        pool.release(&mut session).await;
    }
    assert_eq!(
        breakers.breaker_for(&target().key()).state(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn transient_connect_failure_recovers_within_retry_budget() {
    let transport = MockTransport::new();
    let pool = SessionPool::new(
        Arc::new(transport.clone()),
        PoolConfig {
            max_size: 2,
            borrow_timeout: Duration::from_millis(100),
            ..PoolConfig::default()
        },
    );
    let wrapper = ResilienceWrapper::new(
        fast_retry(3),
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default())),
    );

    // First two connects fail, the third succeeds inside one call.
    transport.fail_connects(2);
    let mut session = wrapper
        .call(&target().key(), acquire_op(&pool))
        .await
        .unwrap();
    pool.release(&mut session).await;

    assert_eq!(transport.connect_count(), 3);
}
