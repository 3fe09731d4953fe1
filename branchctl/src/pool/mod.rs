//! Per-branch connection pools under a single global budget.
//!
//! Each branch gets its own bounded pool, created lazily on first acquire
//! (single-flight via the registry's entry API, so a thundering herd against a
//! cold branch builds one pool, not many). Every physical connection, checked
//! out or parked idle, holds a permit from the global semaphore, so the budget
//! bounds total live connections; idle ones give their permit back only when
//! the sweep reaps them or the pool closes. When the instance-wide budget is
//! exhausted, acquires fail with [`PoolError::GlobalBudgetExhausted`] after the
//! acquire timeout rather than queueing unboundedly.
//!
//! Pools are generic over [`BranchBackend`] so routing, budgeting, eviction,
//! and idle reaping are all testable without Postgres.

mod backend;

pub use backend::{MemoryBackend, PgBackend};

use crate::store::Branch;
use crate::types::{BranchId, abbrev_uuid};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum PoolError {
    /// The branch's pool has been closed (branch deleted, resetting, or the
    /// router is shutting down).
    #[error("connection pool for branch {} is closed", abbrev_uuid(.0))]
    Closed(BranchId),

    /// The branch's own pool stayed saturated past the acquire timeout.
    #[error("branch {} has no free connections", abbrev_uuid(.0))]
    BranchSaturated(BranchId),

    /// The instance-wide connection budget stayed exhausted past the acquire
    /// timeout.
    #[error("global connection budget exhausted")]
    GlobalBudgetExhausted,

    #[error("backend connection failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Opens physical connections for a branch.
#[async_trait::async_trait]
pub trait BranchBackend: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self, branch: &Branch) -> Result<Self::Conn, PoolError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Connection cap for each branch pool.
    pub max_per_branch: usize,
    /// Instance-wide cap across all branch pools.
    pub global_budget: usize,
    /// How long an acquire waits on either cap before giving up.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are reaped by the sweep.
    pub idle_ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_branch: 10,
            global_budget: 100,
            acquire_timeout: Duration::from_secs(5),
            idle_ttl: Duration::from_secs(300),
        }
    }
}

/// A parked connection. It keeps its global permit so the instance budget
/// counts it until the sweep reaps it or the pool closes.
struct IdleConn<C> {
    conn: C,
    since: Instant,
    global_permit: OwnedSemaphorePermit,
}

struct PoolInner<C> {
    idle: Vec<IdleConn<C>>,
    /// Connections currently lent out.
    active: usize,
    closed: bool,
}

/// One branch's pool. The per-branch semaphore caps total connections
/// (idle + active: a checkout either pops an idle connection or opens a fresh
/// one); the mutex guards only the idle list and counters.
struct BranchPool<B: BranchBackend> {
    branch_id: BranchId,
    max: usize,
    slots: Arc<Semaphore>,
    waiters: AtomicUsize,
    inner: Mutex<PoolInner<B::Conn>>,
}

impl<B: BranchBackend> BranchPool<B> {
    fn new(branch_id: BranchId, max_per_branch: usize) -> Self {
        Self {
            branch_id,
            max: max_per_branch,
            slots: Arc::new(Semaphore::new(max_per_branch)),
            waiters: AtomicUsize::new(0),
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                active: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner<B::Conn>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Close the pool and drop all idle connections. Active connections are
    /// dropped on return instead of being pooled.
    fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.idle.clear();
    }

    fn stats(&self) -> BranchPoolStats {
        let inner = self.lock();
        BranchPoolStats {
            branch_id: self.branch_id,
            idle: inner.idle.len(),
            active: inner.active,
            max: self.max,
            waiters: self.waiters.load(Ordering::SeqCst),
        }
    }
}

/// Counts a task waiting in `acquire`, surfaced in pool stats.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl<'a> WaiterGuard<'a> {
    fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection checked out from a branch pool. Returned to the pool's idle
/// list on drop unless the pool was closed in the meantime. The branch permit
/// is released with the guard so waiters can claim the parked connection; the
/// global permit stays with the connection until it is reaped or closed.
pub struct PooledConn<B: BranchBackend> {
    conn: Option<B::Conn>,
    pool: Arc<BranchPool<B>>,
    branch_permit: Option<OwnedSemaphorePermit>,
    global_permit: Option<OwnedSemaphorePermit>,
}

impl<B: BranchBackend> PooledConn<B> {
    /// Consume the guard without returning the connection to the pool. Used
    /// when the caller detects the connection is broken.
    pub fn discard(mut self) {
        self.conn = None;
    }
}

impl<B: BranchBackend> Deref for PooledConn<B> {
    type Target = B::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<B: BranchBackend> DerefMut for PooledConn<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<B: BranchBackend> fmt::Debug for PooledConn<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("branch", &self.pool.branch_id)
            .finish_non_exhaustive()
    }
}

impl<B: BranchBackend> Drop for PooledConn<B> {
    fn drop(&mut self) {
        let mut inner = self.pool.lock();
        inner.active = inner.active.saturating_sub(1);
        if let (Some(conn), Some(global_permit)) = (self.conn.take(), self.global_permit.take())
            && !inner.closed
        {
            inner.idle.push(IdleConn {
                conn,
                since: Instant::now(),
                global_permit,
            });
        }
        // The branch permit drops here, waking any waiter on this pool.
        self.branch_permit.take();
    }
}

/// Per-branch pool statistics, surfaced on the admin API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BranchPoolStats {
    #[schema(value_type = String, format = "uuid")]
    pub branch_id: BranchId,
    pub idle: usize,
    pub active: usize,
    /// Connection cap for this branch's pool.
    pub max: usize,
    /// Tasks currently waiting in acquire.
    pub waiters: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouterStats {
    pub global_budget: usize,
    pub global_in_use: usize,
    pub pools: Vec<BranchPoolStats>,
}

/// Routes acquires to per-branch pools and enforces the global budget.
pub struct PoolRouter<B: BranchBackend> {
    backend: Arc<B>,
    config: PoolConfig,
    pools: DashMap<BranchId, Arc<BranchPool<B>>>,
    global: Arc<Semaphore>,
    shutdown: std::sync::atomic::AtomicBool,
}

impl<B: BranchBackend> PoolRouter<B> {
    pub fn new(backend: B, config: PoolConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            pools: DashMap::new(),
            global: Arc::new(Semaphore::new(config.global_budget)),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn pool_for(&self, branch_id: BranchId) -> Arc<BranchPool<B>> {
        self.pools
            .entry(branch_id)
            .or_insert_with(|| {
                debug!(branch = %abbrev_uuid(&branch_id), "creating branch pool");
                Arc::new(BranchPool::new(branch_id, self.config.max_per_branch))
            })
            .clone()
    }

    /// Check a connection out of the branch's pool, opening a fresh one when
    /// no idle connection is available.
    pub async fn acquire(&self, branch: &Branch) -> Result<PooledConn<B>, PoolError> {
        if self.shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PoolError::Closed(branch.id));
        }
        let pool = self.pool_for(branch.id);
        if pool.lock().closed {
            return Err(PoolError::Closed(branch.id));
        }

        let deadline = Instant::now() + self.config.acquire_timeout;
        let waiting = WaiterGuard::new(&pool.waiters);

        let branch_permit = tokio::time::timeout_at(deadline.into(), pool.slots.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::BranchSaturated(branch.id))?
            .map_err(|_| PoolError::Closed(branch.id))?;

        // Parked connections are claimed first; each carries its own global
        // permit, so no budget wait is needed for a reuse.
        let reused = {
            let mut inner = pool.lock();
            if inner.closed {
                return Err(PoolError::Closed(branch.id));
            }
            let idle = inner.idle.pop();
            if idle.is_some() {
                inner.active += 1;
            }
            idle
        };
        if let Some(idle) = reused {
            drop(waiting);
            return Ok(PooledConn {
                conn: Some(idle.conn),
                pool,
                branch_permit: Some(branch_permit),
                global_permit: Some(idle.global_permit),
            });
        }

        let global_permit = tokio::time::timeout_at(deadline.into(), self.global.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::GlobalBudgetExhausted)?
            .map_err(|_| PoolError::Closed(branch.id))?;
        drop(waiting);

        let conn = self.backend.connect(branch).await?;
        let mut inner = pool.lock();
        if inner.closed {
            return Err(PoolError::Closed(branch.id));
        }
        inner.active += 1;
        drop(inner);

        Ok(PooledConn {
            conn: Some(conn),
            pool,
            branch_permit: Some(branch_permit),
            global_permit: Some(global_permit),
        })
    }

    /// Close and forget a branch's pool. In-flight guards drop their
    /// connections on return. Called on delete, reset, and expiry.
    pub fn evict(&self, branch_id: BranchId) {
        if let Some((_, pool)) = self.pools.remove(&branch_id) {
            info!(branch = %abbrev_uuid(&branch_id), "evicting branch pool");
            pool.close();
        }
    }

    /// Drop idle connections older than the configured TTL and forget pools
    /// that are completely drained.
    pub fn sweep_idle(&self) -> usize {
        let ttl = self.config.idle_ttl;
        let now = Instant::now();
        let mut reaped = 0;
        self.pools.retain(|_, pool| {
            let mut inner = pool.lock();
            let before = inner.idle.len();
            inner.idle.retain(|idle| now.duration_since(idle.since) < ttl);
            reaped += before - inner.idle.len();
            inner.active > 0 || !inner.idle.is_empty()
        });
        if reaped > 0 {
            debug!(reaped, "reaped idle branch connections");
        }
        reaped
    }

    pub fn stats(&self) -> RouterStats {
        let pools: Vec<BranchPoolStats> = self.pools.iter().map(|entry| entry.value().stats()).collect();
        RouterStats {
            global_budget: self.config.global_budget,
            global_in_use: self.config.global_budget - self.global.available_permits(),
            pools,
        }
    }

    /// Stop handing out connections and close every pool.
    pub fn close_all(&self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
    }
}

/// Object-safe slice of the router used by the control plane, so the app
/// state does not carry the backend type parameter.
pub trait PoolService: Send + Sync + 'static {
    fn evict(&self, branch_id: BranchId);
    fn sweep_idle(&self) -> usize;
    fn stats(&self) -> RouterStats;
    fn close_all(&self);
}

impl<B: BranchBackend> PoolService for PoolRouter<B> {
    fn evict(&self, branch_id: BranchId) {
        PoolRouter::evict(self, branch_id);
    }

    fn sweep_idle(&self) -> usize {
        PoolRouter::sweep_idle(self)
    }

    fn stats(&self) -> RouterStats {
        PoolRouter::stats(self)
    }

    fn close_all(&self) {
        PoolRouter::close_all(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchStatus, BranchType, DataCloneMode};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct MockBackend {
        opened: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl BranchBackend for MockBackend {
        type Conn = usize;

        async fn connect(&self, _branch: &Branch) -> Result<usize, PoolError> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn branch(slug: &str) -> Branch {
        let now = Utc::now();
        Branch {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: slug.to_string(),
            parent_branch_id: None,
            branch_type: BranchType::Preview,
            data_clone_mode: DataCloneMode::SchemaOnly,
            status: BranchStatus::Active,
            created_by: Uuid::new_v4(),
            github_pr_number: None,
            github_pr_url: None,
            github_repo: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn config(max_per_branch: usize, global_budget: usize) -> PoolConfig {
        PoolConfig {
            max_per_branch,
            global_budget,
            acquire_timeout: Duration::from_millis(50),
            idle_ttl: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let router = PoolRouter::new(MockBackend::new(), config(4, 16));
        let b = branch("b");

        let conn = router.acquire(&b).await.unwrap();
        assert_eq!(*conn, 0);
        drop(conn);

        // Same physical connection comes back.
        let conn = router.acquire(&b).await.unwrap();
        assert_eq!(*conn, 0);
        assert_eq!(router.backend.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_branch_cap() {
        let router = PoolRouter::new(MockBackend::new(), config(2, 16));
        let b = branch("b");

        let _c1 = router.acquire(&b).await.unwrap();
        let _c2 = router.acquire(&b).await.unwrap();
        let err = router.acquire(&b).await.unwrap_err();
        assert!(matches!(err, PoolError::BranchSaturated(_)));
    }

    #[tokio::test]
    async fn test_global_budget_spans_branches() {
        let router = PoolRouter::new(MockBackend::new(), config(2, 2));
        let a = branch("a");
        let b = branch("b");

        let _c1 = router.acquire(&a).await.unwrap();
        let _c2 = router.acquire(&a).await.unwrap();
        // Branch b has free slots but the instance budget is spent.
        let err = router.acquire(&b).await.unwrap_err();
        assert!(matches!(err, PoolError::GlobalBudgetExhausted));
    }

    #[tokio::test]
    async fn test_idle_connections_hold_budget_until_reaped() {
        let router = PoolRouter::new(MockBackend::new(), config(2, 2));
        let a = branch("a");
        let b = branch("b");

        let c1 = router.acquire(&a).await.unwrap();
        let _c2 = router.acquire(&a).await.unwrap();
        drop(c1);
        // The parked connection still counts against the instance budget.
        let err = router.acquire(&b).await.unwrap_err();
        assert!(matches!(err, PoolError::GlobalBudgetExhausted));

        // Reaping it gives the budget back.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(router.sweep_idle(), 1);
        router.acquire(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_claims_returned_connection() {
        let router = Arc::new(PoolRouter::new(
            MockBackend::new(),
            PoolConfig {
                max_per_branch: 1,
                global_budget: 4,
                acquire_timeout: Duration::from_secs(1),
                idle_ttl: Duration::from_secs(60),
            },
        ));
        let b = branch("b");

        let held = router.acquire(&b).await.unwrap();
        let waiter = tokio::spawn({
            let router = router.clone();
            let b = b.clone();
            async move { router.acquire(&b).await.map(|conn| *conn) }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(router.stats().pools[0].waiters, 1);

        drop(held);
        // The waiter gets the parked connection, not a fresh one.
        assert_eq!(waiter.await.unwrap().unwrap(), 0);
        assert_eq!(router.backend.opened.load(Ordering::SeqCst), 1);
        assert_eq!(router.stats().pools[0].waiters, 0);
    }

    #[tokio::test]
    async fn test_evicted_pool_rejects_then_recreates() {
        let router = PoolRouter::new(MockBackend::new(), config(2, 8));
        let b = branch("b");

        let conn = router.acquire(&b).await.unwrap();
        router.evict(b.id);
        // Returned connection is dropped, not pooled.
        drop(conn);

        let fresh = router.acquire(&b).await.unwrap();
        assert_eq!(*fresh, 1);
    }

    #[tokio::test]
    async fn test_idle_sweep_reaps_stale_conns() {
        let router = PoolRouter::new(MockBackend::new(), config(4, 16));
        let b = branch("b");

        let conn = router.acquire(&b).await.unwrap();
        drop(conn);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(router.sweep_idle(), 1);
        assert!(router.stats().pools.is_empty());
    }

    #[tokio::test]
    async fn test_stats_counts_active_and_idle() {
        let router = PoolRouter::new(MockBackend::new(), config(4, 16));
        let b = branch("b");

        let held = router.acquire(&b).await.unwrap();
        let returned = router.acquire(&b).await.unwrap();
        drop(returned);

        let stats = router.stats();
        // The idle connection keeps its budget permit, so both count.
        assert_eq!(stats.global_in_use, 2);
        assert_eq!(stats.pools.len(), 1);
        assert_eq!(stats.pools[0].active, 1);
        assert_eq!(stats.pools[0].idle, 1);
        assert_eq!(stats.pools[0].max, 4);
        assert_eq!(stats.pools[0].waiters, 0);
        drop(held);
    }

    #[tokio::test]
    async fn test_close_all_stops_acquires() {
        let router = PoolRouter::new(MockBackend::new(), config(4, 16));
        let b = branch("b");
        router.acquire(&b).await.unwrap();
        router.close_all();
        assert!(matches!(router.acquire(&b).await.unwrap_err(), PoolError::Closed(_)));
    }
}
