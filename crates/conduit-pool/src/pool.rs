//! The keyed connection pool.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use conduit_core::{ConduitError, ConduitResult};
use conduit_telemetry::metrics::{
    record_connection_closed, record_connection_opened, record_connection_reused,
};

use crate::connection::{ConnectionId, Connector, Poolable};
use crate::key::ConnectionKey;
use crate::stats::{Counters, KeyStats, PoolStats};

/// Limits and timers of a [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections kept per key; `0` disables reuse.
    pub max_idle_per_key: usize,
    /// How long an idle connection may wait before it is closed.
    pub idle_timeout: Duration,
    /// Connections leased at once per key.
    pub max_connections_per_key: usize,
    /// Connections leased at once across all keys.
    pub max_connections: usize,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
    /// How long opening a connection may take.
    pub connect_timeout: Duration,
    /// Period of the background idle sweep.
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_key: 8,
            idle_timeout: Duration::from_secs(60),
            max_connections_per_key: 64,
            max_connections: 512,
            acquire_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(15),
        }
    }
}

/// Identity shared by everything that counts closes for one key.
#[derive(Clone)]
struct Accounting {
    key: Arc<Counters>,
    global: Arc<Counters>,
    label: Arc<str>,
}

/// An open connection owned by the pool or by a lease.
///
/// Dropping it closes the connection and records why.
struct Pooled<T: Poolable> {
    id: ConnectionId,
    conn: T,
    accounting: Accounting,
    close_reason: &'static str,
}

impl<T: Poolable> Pooled<T> {
    fn open(conn: T, accounting: Accounting) -> Self {
        let id = ConnectionId::next();
        accounting.key.opened.fetch_add(1, Ordering::Relaxed);
        accounting.global.opened.fetch_add(1, Ordering::Relaxed);
        record_connection_opened(&accounting.label);
        debug!(pool_key = %accounting.label, connection_id = %id, "Opened connection");
        Self {
            id,
            conn,
            accounting,
            close_reason: "discarded",
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.accounting.key.closed.fetch_add(1, Ordering::Relaxed);
        self.accounting.global.closed.fetch_add(1, Ordering::Relaxed);
        record_connection_closed(&self.accounting.label, self.close_reason);
        debug!(
            pool_key = %self.accounting.label,
            connection_id = %self.id,
            reason = self.close_reason,
            "Closed connection"
        );
    }
}

struct Idle<T: Poolable> {
    pooled: Pooled<T>,
    since: Instant,
}

impl<T: Poolable> Idle<T> {
    fn is_usable(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.since) < idle_timeout && self.pooled.conn.is_open()
    }

    fn into_stale(mut self) -> Pooled<T> {
        self.pooled.close_reason = if self.pooled.conn.is_open() {
            "expired"
        } else {
            "closed"
        };
        self.pooled
    }
}

struct KeyPool<T: Poolable> {
    idle: Mutex<VecDeque<Idle<T>>>,
    permits: Arc<Semaphore>,
    accounting: Accounting,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    keys: DashMap<ConnectionKey, Arc<KeyPool<C::Connection>>>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> PoolInner<C> {
    fn key_pool(&self, key: &ConnectionKey) -> Arc<KeyPool<C::Connection>> {
        if let Some(existing) = self.keys.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self.keys.entry(key.clone()).or_insert_with(|| {
            Arc::new(KeyPool {
                idle: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(permit_count(
                    self.config.max_connections_per_key,
                ))),
                accounting: Accounting {
                    key: Arc::new(Counters::default()),
                    global: Arc::clone(&self.counters),
                    label: Arc::from(key.to_string()),
                },
            })
        });
        Arc::clone(entry.value())
    }

    /// Pops the most recently released usable connection, closing stale ones.
    fn take_idle(&self, key_pool: &KeyPool<C::Connection>) -> Option<Pooled<C::Connection>> {
        let now = Instant::now();
        let mut stale = Vec::new();
        let found = {
            let mut idle = key_pool.idle.lock();
            loop {
                match idle.pop_back() {
                    Some(entry) if entry.is_usable(now, self.config.idle_timeout) => {
                        break Some(entry.pooled)
                    }
                    Some(entry) => stale.push(entry.into_stale()),
                    None => break None,
                }
            }
        };
        drop(stale);
        found
    }

    /// Closes expired idle connections and forgets keys nobody uses.
    fn reap(&self) -> usize {
        let now = Instant::now();
        let mut reaped = Vec::new();

        for entry in &self.keys {
            let mut idle = entry.value().idle.lock();
            if idle.is_empty() {
                continue;
            }
            let (keep, expired): (VecDeque<_>, VecDeque<_>) = idle
                .drain(..)
                .partition(|candidate| candidate.is_usable(now, self.config.idle_timeout));
            *idle = keep;
            reaped.extend(expired.into_iter().map(Idle::into_stale));
        }

        self.keys
            .retain(|_, key_pool| Arc::strong_count(key_pool) > 1 || !key_pool.idle.lock().is_empty());

        let count = reaped.len();
        drop(reaped);
        if count > 0 {
            debug!(count, "Reaped idle connections");
        }
        count
    }
}

impl<C: Connector> Drop for PoolInner<C> {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().take() {
            reaper.abort();
        }
    }
}

fn permit_count(limit: usize) -> usize {
    limit.clamp(1, Semaphore::MAX_PERMITS)
}

/// A pool of reusable connections grouped by [`ConnectionKey`].
///
/// Each key has its own idle list and lease limit; a global limit caps the
/// number of leases across keys. Idle connections are reused most recently
/// released first. A background task closes connections idle for longer
/// than [`PoolConfig::idle_timeout`] when the pool is created inside a Tokio
/// runtime.
///
/// Cloning a `Pool` is cheap and shares the same connections.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Pool<C> {
    /// Creates a pool that opens connections with `connector`.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let inner = Arc::new(PoolInner {
            connector,
            permits: Arc::new(Semaphore::new(permit_count(config.max_connections))),
            config,
            keys: DashMap::new(),
            counters: Arc::new(Counters::default()),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });
        *inner.reaper.lock() = spawn_reaper(&inner);
        Self { inner }
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the connector.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Leases a connection for `key`, reusing an idle one when possible.
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if no slot frees up within the acquire timeout
    /// - `Timeout` if opening a new connection exceeds the connect timeout
    /// - whatever the connector returns when opening fails
    pub async fn acquire(&self, key: &ConnectionKey) -> ConduitResult<Lease<C>> {
        if self.is_shutdown() {
            return Err(ConduitError::PoolClosed);
        }

        let key_pool = self.inner.key_pool(key);
        let started = Instant::now();
        let deadline = started + self.inner.config.acquire_timeout;

        let permits = tokio::time::timeout_at(deadline, async {
            let key_permit = Arc::clone(&key_pool.permits).acquire_owned().await?;
            let global_permit = Arc::clone(&self.inner.permits).acquire_owned().await?;
            Ok::<_, tokio::sync::AcquireError>((key_permit, global_permit))
        })
        .await;

        let (key_permit, global_permit) = match permits {
            Ok(Ok(permits)) => permits,
            Ok(Err(_)) => return Err(ConduitError::PoolClosed),
            Err(_) => {
                let waited = started.elapsed();
                warn!(pool_key = %key, waited = ?waited, "Connection pool exhausted");
                return Err(ConduitError::pool_exhausted(key.to_string(), waited));
            }
        };
        let slot = LeaseSlot::new(&key_pool.accounting, key_permit, global_permit);

        if let Some(pooled) = self.inner.take_idle(&key_pool) {
            key_pool.accounting.key.reused.fetch_add(1, Ordering::Relaxed);
            self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
            record_connection_reused(&key_pool.accounting.label);
            debug!(pool_key = %key, connection_id = %pooled.id, "Reusing idle connection");
            return Ok(Lease {
                pooled,
                key: key.clone(),
                reused: true,
                pool: Arc::clone(&self.inner),
                key_pool,
                slot,
            });
        }

        let connect_timeout = self.inner.config.connect_timeout;
        let conn = match tokio::time::timeout(connect_timeout, self.inner.connector.connect(key)).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                debug!(pool_key = %key, error = %e, "Failed to open connection");
                return Err(e);
            }
            Err(_) => {
                debug!(pool_key = %key, "Timed out opening connection");
                return Err(ConduitError::timeout("connect", connect_timeout));
            }
        };

        Ok(Lease {
            pooled: Pooled::open(conn, key_pool.accounting.clone()),
            key: key.clone(),
            reused: false,
            pool: Arc::clone(&self.inner),
            key_pool,
            slot,
        })
    }

    /// Closes expired idle connections now instead of waiting for the sweep.
    ///
    /// Returns how many connections were closed.
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    /// Closes every idle connection and refuses new leases.
    ///
    /// Outstanding leases stay usable; their connections are closed when
    /// released.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();
        if let Some(reaper) = self.inner.reaper.lock().take() {
            reaper.abort();
        }

        let mut closing = Vec::new();
        for entry in &self.inner.keys {
            entry.value().permits.close();
            closing.extend(entry.value().idle.lock().drain(..).map(|idle| {
                let mut pooled = idle.pooled;
                pooled.close_reason = "shutdown";
                pooled
            }));
        }
        debug!(idle = closing.len(), "Connection pool shut down");
    }

    /// Returns `true` once [`Pool::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle = self
            .inner
            .keys
            .iter()
            .map(|entry| entry.value().idle.lock().len())
            .sum();
        PoolStats {
            keys: self.inner.keys.len(),
            idle,
            leased: self.inner.counters.leased(),
            opened: self.inner.counters.opened(),
            reused: self.inner.counters.reused(),
            closed: self.inner.counters.closed(),
        }
    }

    /// Returns a snapshot of the counters for `key`, if the pool tracks it.
    #[must_use]
    pub fn key_stats(&self, key: &ConnectionKey) -> Option<KeyStats> {
        self.inner.keys.get(key).map(|entry| {
            let key_pool = entry.value();
            let counters = &key_pool.accounting.key;
            KeyStats {
                idle: key_pool.idle.lock().len(),
                leased: counters.leased(),
                opened: counters.opened(),
                reused: counters.reused(),
                closed: counters.closed(),
            }
        })
    }
}

fn spawn_reaper<C: Connector>(inner: &Arc<PoolInner<C>>) -> Option<JoinHandle<()>> {
    let handle = Handle::try_current().ok()?;
    let pool = Arc::downgrade(inner);
    let period = inner.config.reap_interval.max(Duration::from_millis(1));

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = pool.upgrade() else {
                break;
            };
            inner.reap();
        }
    }))
}

/// Holds the lease limits while a connection is out of the pool.
struct LeaseSlot {
    key: Arc<Counters>,
    global: Arc<Counters>,
    _key_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

impl LeaseSlot {
    fn new(
        accounting: &Accounting,
        key_permit: OwnedSemaphorePermit,
        global_permit: OwnedSemaphorePermit,
    ) -> Self {
        accounting.key.leased.fetch_add(1, Ordering::AcqRel);
        accounting.global.leased.fetch_add(1, Ordering::AcqRel);
        Self {
            key: Arc::clone(&accounting.key),
            global: Arc::clone(&accounting.global),
            _key_permit: key_permit,
            _global_permit: global_permit,
        }
    }
}

impl Drop for LeaseSlot {
    fn drop(&mut self) {
        self.key.leased.fetch_sub(1, Ordering::AcqRel);
        self.global.leased.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive use of one pooled connection.
///
/// Give the connection back with [`Lease::release`]. Dropping the lease, or
/// calling [`Lease::discard`], closes the connection instead.
pub struct Lease<C: Connector> {
    pooled: Pooled<C::Connection>,
    key: ConnectionKey,
    reused: bool,
    pool: Arc<PoolInner<C>>,
    key_pool: Arc<KeyPool<C::Connection>>,
    slot: LeaseSlot,
}

impl<C: Connector> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.pooled.id)
            .field("key", &self.key)
            .field("reused", &self.reused)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Lease<C> {
    /// Returns the connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.pooled.id
    }

    /// Returns the key the connection belongs to.
    #[must_use]
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Returns `true` if the connection was taken from the idle list.
    #[must_use]
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Returns the connection.
    #[must_use]
    pub fn connection(&self) -> &C::Connection {
        &self.pooled.conn
    }

    /// Returns the connection mutably.
    pub fn connection_mut(&mut self) -> &mut C::Connection {
        &mut self.pooled.conn
    }

    /// Returns the connection to the pool.
    ///
    /// The connection is closed instead when `reusable` is false, when it is
    /// no longer open, when the pool is shut down or when reuse is disabled.
    /// If the idle list grows past its limit the oldest idle connection is
    /// closed.
    pub fn release(self, reusable: bool) {
        let Self {
            mut pooled,
            pool,
            key_pool,
            slot,
            ..
        } = self;

        let reason = if !reusable {
            Some("not_reusable")
        } else if !pooled.conn.is_open() {
            Some("closed")
        } else if pool.config.max_idle_per_key == 0 {
            Some("idle_limit")
        } else {
            None
        };
        if let Some(reason) = reason {
            pooled.close_reason = reason;
            drop(pooled);
            drop(slot);
            return;
        }

        let mut evicted = Vec::new();
        {
            let mut idle = key_pool.idle.lock();
            if pool.closed.load(Ordering::Acquire) {
                pooled.close_reason = "shutdown";
                evicted.push(pooled);
            } else {
                debug!(pool_key = %key_pool.accounting.label, connection_id = %pooled.id, "Released connection");
                idle.push_back(Idle {
                    pooled,
                    since: Instant::now(),
                });
                while idle.len() > pool.config.max_idle_per_key {
                    if let Some(oldest) = idle.pop_front() {
                        let mut oldest = oldest.pooled;
                        oldest.close_reason = "idle_limit";
                        evicted.push(oldest);
                    }
                }
            }
        }
        drop(slot);
        drop(evicted);
    }

    /// Closes the connection without returning it to the pool.
    pub fn discard(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Scheme;
    use conduit_core::{BoxFuture, ErrorKind};
    use std::sync::atomic::AtomicUsize;

    struct FakeConn {
        open: Arc<AtomicBool>,
    }

    impl Poolable for FakeConn {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail: AtomicBool,
        delay: Option<Duration>,
    }

    impl Connector for FakeConnector {
        type Connection = FakeConn;

        fn connect<'a>(&'a self, key: &'a ConnectionKey) -> BoxFuture<'a, ConduitResult<FakeConn>> {
            Box::pin(async move {
                self.connects.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(ConduitError::connect(
                        key.authority(),
                        std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                    ));
                }
                Ok(FakeConn {
                    open: Arc::new(AtomicBool::new(true)),
                })
            })
        }
    }

    fn key() -> ConnectionKey {
        ConnectionKey::new(Scheme::Http, "backend", 8080)
    }

    fn pool(config: PoolConfig) -> Pool<FakeConnector> {
        Pool::new(FakeConnector::default(), config)
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let pool = pool(PoolConfig {
            max_idle_per_key: 1,
            ..Default::default()
        });

        let first = pool.acquire(&key()).await.unwrap();
        let id = first.id();
        assert!(!first.is_reused());
        first.release(true);

        let second = pool.acquire(&key()).await.unwrap();
        assert_eq!(second.id(), id);
        assert!(second.is_reused());
        assert_eq!(pool.connector().connects.load(Ordering::SeqCst), 1);

        let stats = pool.stats();
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.reused, 1);
    }

    #[tokio::test]
    async fn test_concurrent_leases_get_distinct_connections() {
        let pool = pool(PoolConfig::default());
        let a = pool.acquire(&key()).await.unwrap();
        let b = pool.acquire(&key()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().leased, 2);
    }

    #[tokio::test]
    async fn test_per_key_limit_exhausts() {
        let pool = pool(PoolConfig {
            max_connections_per_key: 1,
            acquire_timeout: Duration::from_millis(50),
            ..Default::default()
        });

        let held = pool.acquire(&key()).await.unwrap();
        let err = pool.acquire(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
        assert!(!err.connection_established());

        let other = ConnectionKey::new(Scheme::Http, "other", 8080);
        assert!(pool.acquire(&other).await.is_ok());
        drop(held);
    }

    #[tokio::test]
    async fn test_global_limit_spans_keys() {
        let pool = pool(PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        let _held = pool.acquire(&key()).await.unwrap();
        let other = ConnectionKey::new(Scheme::Http, "other", 8080);
        let err = pool.acquire(&other).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let pool = pool(PoolConfig {
            max_connections_per_key: 1,
            ..Default::default()
        });
        let held = pool.acquire(&key()).await.unwrap();
        let id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&key()).await.map(|lease| lease.id()) })
        };
        tokio::task::yield_now().await;
        held.release(true);

        assert_eq!(waiter.await.unwrap().unwrap(), id);
    }

    #[tokio::test]
    async fn test_not_reusable_release_closes() {
        let pool = pool(PoolConfig::default());
        let lease = pool.acquire(&key()).await.unwrap();
        let id = lease.id();
        lease.release(false);

        let next = pool.acquire(&key()).await.unwrap();
        assert_ne!(next.id(), id);
        assert_eq!(pool.stats().closed, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_closes_connection() {
        let pool = pool(PoolConfig::default());
        let lease = pool.acquire(&key()).await.unwrap();
        drop(lease);

        let stats = pool.stats();
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.leased, 0);
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_reused() {
        let pool = pool(PoolConfig::default());
        let lease = pool.acquire(&key()).await.unwrap();
        let id = lease.id();
        let open = Arc::clone(&lease.connection().open);
        lease.release(true);
        open.store(false, Ordering::SeqCst);

        let next = pool.acquire(&key()).await.unwrap();
        assert_ne!(next.id(), id);
        assert_eq!(pool.stats().closed, 1);
    }

    #[tokio::test]
    async fn test_idle_list_respects_limit() {
        let pool = pool(PoolConfig {
            max_idle_per_key: 2,
            ..Default::default()
        });

        let leases = vec![
            pool.acquire(&key()).await.unwrap(),
            pool.acquire(&key()).await.unwrap(),
            pool.acquire(&key()).await.unwrap(),
        ];
        for lease in leases {
            lease.release(true);
        }

        let stats = pool.key_stats(&key()).unwrap();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.opened, 3);
    }

    #[tokio::test]
    async fn test_zero_idle_disables_reuse() {
        let pool = pool(PoolConfig {
            max_idle_per_key: 0,
            ..Default::default()
        });
        let first = pool.acquire(&key()).await.unwrap();
        let id = first.id();
        first.release(true);
        let second = pool.acquire(&key()).await.unwrap();
        assert_ne!(second.id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_idle_connection_is_replaced() {
        let pool = pool(PoolConfig {
            idle_timeout: Duration::from_secs(5),
            reap_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let lease = pool.acquire(&key()).await.unwrap();
        let id = lease.id();
        lease.release(true);

        tokio::time::advance(Duration::from_secs(6)).await;

        let next = pool.acquire(&key()).await.unwrap();
        assert_ne!(next.id(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_closes_idle_connections() {
        let pool = pool(PoolConfig {
            idle_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(15),
            ..Default::default()
        });
        pool.acquire(&key()).await.unwrap().release(true);
        assert_eq!(pool.stats().idle, 1);

        tokio::time::sleep(Duration::from_secs(20)).await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.keys, 0);
    }

    #[tokio::test]
    async fn test_manual_reap_keeps_fresh_connections() {
        let pool = pool(PoolConfig::default());
        pool.acquire(&key()).await.unwrap().release(true);
        assert_eq!(pool.reap(), 0);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reap_splits_expired_from_fresh() {
        let pool = pool(PoolConfig {
            idle_timeout: Duration::from_secs(10),
            reap_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        let first = pool.acquire(&key()).await.unwrap();
        let second = pool.acquire(&key()).await.unwrap();
        let fresh_id = second.id();
        first.release(true);
        tokio::time::advance(Duration::from_secs(8)).await;
        second.release(true);
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(pool.reap(), 1);
        let key_stats = pool.key_stats(&key()).unwrap();
        assert_eq!(key_stats.idle, 1);
        assert_eq!(key_stats.closed, 1);
        assert_eq!(pool.acquire(&key()).await.unwrap().id(), fresh_id);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let pool = pool(PoolConfig::default());
        pool.connector().fail.store(true, Ordering::SeqCst);

        let err = pool.acquire(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(pool.stats().leased, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let pool = Pool::new(
            FakeConnector {
                delay: Some(Duration::from_secs(30)),
                ..Default::default()
            },
            PoolConfig {
                connect_timeout: Duration::from_secs(1),
                ..Default::default()
            },
        );

        let err = pool.acquire(&key()).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.connection_established());
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_refuses_leases() {
        let pool = pool(PoolConfig::default());
        let held = pool.acquire(&key()).await.unwrap();
        pool.acquire(&key()).await.unwrap().release(true);

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.stats().idle, 0);
        let err = pool.acquire(&key()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PoolClosed);
        assert!(!err.connection_established());

        held.release(true);
        assert_eq!(pool.stats().closed, 2);
    }
}
