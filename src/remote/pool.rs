//! Keyed session pool
//!
//! One bounded pool per `(username, host, port)` target. Accounting is
//! permit-based: a semaphore of `max_size` permits bounds live sessions,
//! a borrower holds a permit for the lifetime of its [`PooledSession`], and
//! idle sessions sit in a deque without permits. Release and invalidate are
//! idempotent; dropping a still-borrowed session invalidates it rather than
//! leaking the slot.

use crate::config::PoolConfig;
use crate::error::{EngineError, EngineResult};
use crate::remote::session::RemoteSession;
use crate::remote::target::{ConnectionTarget, TargetKey};
use crate::remote::transport::{CommandOutput, CommandTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Counters per target pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub created: usize,
    pub reused: usize,
    pub invalidated: usize,
    pub evicted: usize,
}

struct TargetPool {
    key: TargetKey,
    idle: tokio::sync::Mutex<VecDeque<RemoteSession>>,
    permits: Arc<Semaphore>,
    stats: Mutex<PoolStats>,
}

/// Process-wide session pool, keyed by target identity.
pub struct SessionPool {
    transport: Arc<dyn CommandTransport>,
    config: PoolConfig,
    pools: Mutex<HashMap<TargetKey, Arc<TargetPool>>>,
}

impl SessionPool {
    pub fn new(transport: Arc<dyn CommandTransport>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            pools: Mutex::new(HashMap::new()),
        })
    }

    fn target_pool(&self, key: &TargetKey) -> Arc<TargetPool> {
        let mut pools = self.pools.lock().unwrap();
        Arc::clone(pools.entry(key.clone()).or_insert_with(|| {
            Arc::new(TargetPool {
                key: key.clone(),
                idle: tokio::sync::Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(self.config.max_size)),
                stats: Mutex::new(PoolStats::default()),
            })
        }))
    }

    /// Borrow a live session for the target.
    ///
    /// Prefers a validated idle session, creates under `max_size`, and
    /// otherwise blocks up to `borrow_timeout` before failing with
    /// [`EngineError::PoolExhausted`].
    pub async fn acquire(&self, target: &ConnectionTarget) -> EngineResult<PooledSession> {
        let key = target.key();
        let pool = self.target_pool(&key);

        let permit = tokio::time::timeout(
            self.config.borrow_timeout,
            Arc::clone(&pool.permits).acquire_owned(),
        )
        .await
        .map_err(|_| EngineError::PoolExhausted {
            target: key.to_string(),
            waited: self.config.borrow_timeout,
        })?
        .map_err(|_| EngineError::Connection(format!("pool for {key} is shut down")))?;

        // Reuse an idle session if one validates.
        loop {
            let candidate = pool.idle.lock().await.pop_front();
            let Some(mut session) = candidate else { break };

            if !self.config.test_on_borrow || session.validate().await {
                session.touch();
                pool.stats.lock().unwrap().reused += 1;
                debug!(target = %key, session = %session.id(), "reusing pooled session");
                return Ok(PooledSession::borrowed(session, permit, &pool));
            }

            warn!(target = %key, session = %session.id(), "idle session failed validation");
            session.close().await;
            pool.stats.lock().unwrap().invalidated += 1;
        }

        // Nothing idle: create a fresh session under the permit.
        let session = RemoteSession::open(self.transport.as_ref(), target).await?;
        pool.stats.lock().unwrap().created += 1;
        Ok(PooledSession::borrowed(session, permit, &pool))
    }

    /// Return a session to its pool. No-op if already returned.
    pub async fn release(&self, session: &mut PooledSession) {
        session.give_back().await;
    }

    /// Destroy a session instead of returning it. No-op if already returned.
    pub async fn invalidate(&self, session: &mut PooledSession) {
        session.discard().await;
    }

    pub fn stats(&self, key: &TargetKey) -> PoolStats {
        let pools = self.pools.lock().unwrap();
        pools
            .get(key)
            .map(|p| p.stats.lock().unwrap().clone())
            .unwrap_or_default()
    }

    /// Spawn the background idle-eviction task. Stops when the pool is dropped.
    pub fn spawn_evictor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.eviction_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(pool) = weak.upgrade() else { break };
                pool.evict_idle().await;
            }
        });
    }

    /// One eviction pass: close sessions idle past `idle_timeout`, keeping
    /// at least `min_idle` per target.
    pub async fn evict_idle(&self) {
        let pools: Vec<Arc<TargetPool>> = {
            let guard = self.pools.lock().unwrap();
            guard.values().cloned().collect()
        };

        for pool in pools {
            let mut expired = Vec::new();
            {
                let mut idle = pool.idle.lock().await;
                while idle.len() > self.config.min_idle {
                    match idle.front() {
                        Some(s) if s.idle_for() >= self.config.idle_timeout => {
                            if let Some(s) = idle.pop_front() {
                                expired.push(s);
                            }
                        }
                        _ => break,
                    }
                }
            }
            if !expired.is_empty() {
                let mut stats = pool.stats.lock().unwrap();
                stats.evicted += expired.len();
            }
            for mut session in expired {
                debug!(target = %pool.key, session = %session.id(), "evicting idle session");
                session.close().await;
            }
        }
    }
}

/// An exclusively borrowed session.
///
/// The borrower must hand it back via [`SessionPool::release`] or
/// [`SessionPool::invalidate`]; both are idempotent. Dropping without either
/// closes the session in the background so the pool slot is never leaked.
pub struct PooledSession {
    inner: Option<RemoteSession>,
    permit: Option<OwnedSemaphorePermit>,
    home: Weak<TargetPool>,
    key: TargetKey,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("key", &self.key)
            .field("borrowed", &self.inner.is_some())
            .finish()
    }
}

impl PooledSession {
    fn borrowed(session: RemoteSession, permit: OwnedSemaphorePermit, home: &Arc<TargetPool>) -> Self {
        Self {
            inner: Some(session),
            permit: Some(permit),
            home: Arc::downgrade(home),
            key: home.key.clone(),
        }
    }

    pub fn target_key(&self) -> &TargetKey {
        &self.key
    }

    /// Run a command on the borrowed session.
    pub async fn exec(&mut self, command: &str) -> EngineResult<CommandOutput> {
        match self.inner.as_mut() {
            Some(session) => session.exec(command).await,
            None => Err(EngineError::Validation(
                "session was already returned to the pool".to_string(),
            )),
        }
    }

    async fn give_back(&mut self) {
        if let Some(mut session) = self.inner.take() {
            session.touch();
            if let Some(home) = self.home.upgrade() {
                home.idle.lock().await.push_back(session);
            } else {
                session.close().await;
            }
            self.permit.take();
        }
    }

    async fn discard(&mut self) {
        if let Some(mut session) = self.inner.take() {
            session.close().await;
            if let Some(home) = self.home.upgrade() {
                home.stats.lock().unwrap().invalidated += 1;
            }
            self.permit.take();
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(mut session) = self.inner.take() {
            self.permit.take();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    session.close().await;
                });
            }
        }
    }
}
