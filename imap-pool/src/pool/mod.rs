//! # Connection pool
//!
//! The [`ConnectionPool`] owns the lifecycle of every
//! [`Connection`]: creation (with retries), checkout, release, idle
//! reaping and shutdown. Connections are grouped by [`IdentityKey`]:
//! two accounts of the same user never share a connection.
//!
//! A checkout first tries to reuse an idle connection of the
//! identity, then creates a new one if the identity is below
//! [`PoolConfig::max_connections`], otherwise polls every
//! [`POLL_INTERVAL`] until a connection becomes available or
//! [`PoolConfig::connection_timeout`] elapses.

pub mod config;

use std::{
    collections::HashMap,
    fmt,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

#[doc(inline)]
pub use self::config::PoolConfig;
use crate::{
    connection::{
        Connection, ConnectionEvent, ConnectionListener, ConnectionParams, Connector,
        SubscriptionId,
    },
    Error, Result,
};

/// How often a checkout blocked by capacity looks for an available
/// connection.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The unit of multiplexing: all pooling, context sharing and
/// metrics are scoped to this pair.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IdentityKey {
    pub user_id: String,
    pub account_id: String,
}

impl IdentityKey {
    pub fn new(user_id: impl ToString, account_id: impl ToString) -> Self {
        Self {
            user_id: user_id.to_string(),
            account_id: account_id.to_string(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.account_id)
    }
}

/// A connection checked out from the pool.
///
/// The handle must be given back with
/// [`ConnectionPool::release_connection`]. Cloning the handle does
/// not check out the connection twice.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: u64,
    key: IdentityKey,
    connection: Arc<dyn Connection>,
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }
}

impl Deref for ConnectionHandle {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A snapshot of the pool state of one identity.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Established connections, in use or idle.
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,

    /// Connections being established.
    pub connecting: usize,
}

/// A connection tracked by the pool.
///
/// It is either checked out by exactly one logical operation
/// (`in_use`) or idle and eligible for reuse or reaping.
struct PooledConnection {
    id: u64,
    connection: Arc<dyn Connection>,
    subscription: Option<SubscriptionId>,
    in_use: bool,
    last_used_at: Instant,
}

/// The connections of one identity.
#[derive(Default)]
struct IdentityPool {
    connections: Vec<PooledConnection>,

    /// Connections being established. They count against the maximum
    /// so concurrent checkouts cannot exceed it.
    connecting: usize,
}

impl IdentityPool {
    fn is_empty(&self) -> bool {
        self.connections.is_empty() && self.connecting == 0
    }

    fn idle_count(&self) -> usize {
        self.connections.iter().filter(|c| !c.in_use).count()
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    pools: Mutex<HashMap<IdentityKey, IdentityPool>>,
    next_id: AtomicU64,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    /// Lock the pool lists. Mutations never await while the lock is
    /// held.
    fn pools(&self) -> MutexGuard<'_, HashMap<IdentityKey, IdentityPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, key: &IdentityKey, id: u64) -> Option<PooledConnection> {
        let mut pools = self.pools();

        let pool = pools.get_mut(key)?;
        let pos = pool.connections.iter().position(|c| c.id == id)?;
        let conn = pool.connections.remove(pos);

        if pool.is_empty() {
            pools.remove(key);
        }

        Some(conn)
    }

    async fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let mut reaped = Vec::new();

        {
            let mut pools = self.pools();

            for (key, pool) in pools.iter_mut() {
                let mut idle = pool.idle_count();
                let mut i = 0;

                while i < pool.connections.len() {
                    let reapable = {
                        let conn = &pool.connections[i];
                        !conn.in_use
                            && now.duration_since(conn.last_used_at) > self.config.idle_timeout
                            && idle > self.config.min_connections
                    };

                    if reapable {
                        reaped.push((key.clone(), pool.connections.remove(i)));
                        idle -= 1;
                    } else {
                        i += 1;
                    }
                }
            }

            pools.retain(|_, pool| !pool.is_empty());
        }

        let count = reaped.len();

        for (key, conn) in reaped {
            debug!(%key, id = conn.id, "disconnecting idle imap connection");

            if let Some(subscription) = conn.subscription {
                conn.connection.unsubscribe(subscription);
            }

            if let Err(err) = conn.connection.disconnect().await {
                debug!(%key, id = conn.id, "cannot disconnect idle imap connection: {err}");
            }
        }

        count
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let reaper = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(reaper) = reaper.take() {
            reaper.abort();
        }
    }
}

/// A capacity slot reserved for a connection being established.
///
/// Dropping the slot without committing it gives the capacity back,
/// which covers failed connects as well as cancelled checkouts.
struct ConnectingSlot<'a> {
    inner: &'a PoolInner,
    key: &'a IdentityKey,
    committed: bool,
}

impl ConnectingSlot<'_> {
    fn commit(mut self, conn: PooledConnection) {
        let mut pools = self.inner.pools();
        let pool = pools.entry(self.key.clone()).or_default();
        pool.connecting = pool.connecting.saturating_sub(1);
        pool.connections.push(conn);
        self.committed = true;
    }
}

impl Drop for ConnectingSlot<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        let mut pools = self.inner.pools();

        if let Some(pool) = pools.get_mut(self.key) {
            pool.connecting = pool.connecting.saturating_sub(1);

            if pool.is_empty() {
                pools.remove(self.key);
            }
        }
    }
}

enum Admission<'a> {
    Reuse(ConnectionHandle),
    Create(ConnectingSlot<'a>),
    Wait,
}

/// The connection pool.
///
/// This is a cheap handle: clones share the same connections. The
/// pool is meant to be built once at service start and closed with
/// [`ConnectionPool::close_all`] at shutdown.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                pools: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                reaper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection for the given identity.
    ///
    /// Reuses an idle connection when possible, creates a new one
    /// when the identity is below capacity, otherwise waits for one
    /// to become available.
    pub async fn get_connection(
        &self,
        params: &ConnectionParams,
        key: &IdentityKey,
    ) -> Result<ConnectionHandle> {
        let timeout = self.inner.config.connection_timeout;
        let started = Instant::now();

        loop {
            match self.admit(key) {
                Admission::Reuse(handle) => {
                    debug!(%key, id = handle.id, "reusing idle imap connection");
                    return Ok(handle);
                }
                Admission::Create(slot) => {
                    return self.create_connection(params, key, slot).await;
                }
                Admission::Wait => {
                    let elapsed = started.elapsed();

                    if elapsed >= timeout {
                        warn!(%key, ?timeout, "no imap connection available in time");
                        return Err(Error::PoolTimeoutError(key.to_string(), timeout));
                    }

                    debug!(%key, "pool at capacity, waiting for an idle connection");
                    sleep(POLL_INTERVAL.min(timeout - elapsed)).await;
                }
            }
        }
    }

    /// Give a checked out connection back to the pool.
    ///
    /// Does nothing if the connection is not tracked anymore, for
    /// example because the server closed it in the meantime.
    pub fn release_connection(&self, handle: &ConnectionHandle) {
        let mut pools = self.inner.pools();

        let conn = pools.get_mut(&handle.key).and_then(|pool| {
            pool.connections
                .iter_mut()
                .find(|conn| conn.id == handle.id)
        });

        match conn {
            Some(conn) => {
                conn.in_use = false;
                conn.last_used_at = Instant::now();
                debug!(key = %handle.key, id = handle.id, "imap connection released");
            }
            None => {
                debug!(key = %handle.key, id = handle.id, "imap connection not pooled anymore, skipping release");
            }
        }
    }

    /// Forget a checked out connection and disconnect it in the
    /// background.
    ///
    /// Used for connections left in a state other operations cannot
    /// reuse, like a folder watch nobody stops. Frees the capacity
    /// of the identity right away.
    pub fn discard_connection(&self, handle: &ConnectionHandle) {
        let Some(conn) = self.inner.remove(&handle.key, handle.id) else {
            debug!(key = %handle.key, id = handle.id, "imap connection not pooled anymore, skipping discard");
            return;
        };

        if let Some(subscription) = conn.subscription {
            conn.connection.unsubscribe(subscription);
        }

        debug!(key = %handle.key, id = handle.id, "discarding imap connection");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %handle.key, id = handle.id, "no async runtime, cannot disconnect discarded imap connection");
            return;
        };

        let key = handle.key.clone();
        let id = handle.id;

        runtime.spawn(async move {
            if let Err(err) = conn.connection.disconnect().await {
                debug!(%key, id, "cannot disconnect discarded imap connection: {err}");
            }
        });
    }

    /// Run one idle-cleanup pass and return the number of
    /// disconnected connections.
    ///
    /// A connection is reaped if it is idle for longer than
    /// [`PoolConfig::idle_timeout`] and its identity has more idle
    /// connections than [`PoolConfig::min_connections`].
    pub async fn reap_idle(&self) -> usize {
        self.inner.reap_idle().await
    }

    /// Spawn the background reaper, running [`Self::reap_idle`] every
    /// [`PoolConfig::reap_interval`]. Calling it twice has no effect.
    pub fn start_reaper(&self) {
        let mut reaper = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if reaper.is_some() {
            return;
        }

        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval;

        *reaper = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let Some(inner) = inner.upgrade() else {
                    break;
                };

                let reaped = inner.reap_idle().await;

                if reaped > 0 {
                    debug!(reaped, "idle imap connections reaped");
                }
            }
        }));
    }

    /// Disconnect every connection of every identity and clear the
    /// pool. A failing disconnect does not prevent the others.
    pub async fn close_all(&self) {
        let reaper = self
            .inner
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(reaper) = reaper {
            reaper.abort();
        }

        let pools = std::mem::take(&mut *self.inner.pools());

        let disconnects = pools
            .into_iter()
            .flat_map(|(key, pool)| pool.connections.into_iter().map(move |c| (key.clone(), c)))
            .map(|(key, conn)| async move {
                if let Some(subscription) = conn.subscription {
                    conn.connection.unsubscribe(subscription);
                }

                if let Err(err) = conn.connection.disconnect().await {
                    warn!(%key, id = conn.id, "cannot disconnect imap connection: {err}");
                }
            });

        let count = join_all(disconnects).await.len();
        info!(count, "imap connection pool closed");
    }

    /// Return a snapshot of the pool state of the given identity.
    pub fn stats(&self, key: &IdentityKey) -> PoolStats {
        let pools = self.inner.pools();

        match pools.get(key) {
            None => PoolStats::default(),
            Some(pool) => {
                let idle = pool.idle_count();
                PoolStats {
                    total: pool.connections.len(),
                    in_use: pool.connections.len() - idle,
                    idle,
                    connecting: pool.connecting,
                }
            }
        }
    }

    fn admit<'a>(&'a self, key: &'a IdentityKey) -> Admission<'a> {
        let mut pools = self.inner.pools();
        let pool = pools.entry(key.clone()).or_default();

        let idle = pool
            .connections
            .iter_mut()
            .find(|conn| !conn.in_use && conn.connection.is_usable());

        if let Some(conn) = idle {
            conn.in_use = true;
            conn.last_used_at = Instant::now();

            return Admission::Reuse(ConnectionHandle {
                id: conn.id,
                key: key.clone(),
                connection: conn.connection.clone(),
            });
        }

        if pool.connections.len() + pool.connecting < self.inner.config.max_connections {
            pool.connecting += 1;

            return Admission::Create(ConnectingSlot {
                inner: &self.inner,
                key,
                committed: false,
            });
        }

        if pool.is_empty() {
            pools.remove(key);
        }

        Admission::Wait
    }

    async fn create_connection(
        &self,
        params: &ConnectionParams,
        key: &IdentityKey,
        slot: ConnectingSlot<'_>,
    ) -> Result<ConnectionHandle> {
        let attempts = self.inner.config.retry_attempts.max(1);
        let mut attempt = 1;

        let connection = loop {
            debug!(%key, attempt, host = %params.host, "connecting to imap server");

            match self.inner.connector.connect(params).await {
                Ok(connection) => break connection,
                Err(err) if attempt < attempts => {
                    let delay = self.inner.config.retry_delay_after(attempt);
                    warn!(%key, attempt, ?delay, "cannot connect to imap server, retrying: {err}");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(%key, attempt, "cannot connect to imap server, giving up: {err}");
                    let host = params.host.clone();
                    return Err(Error::ConnectionFailedError(err, host, params.port, attempt));
                }
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = connection.subscribe(self.listener(key.clone(), id));

        slot.commit(PooledConnection {
            id,
            connection: connection.clone(),
            subscription: Some(subscription),
            in_use: true,
            last_used_at: Instant::now(),
        });

        info!(%key, id, "new imap connection added to pool");

        Ok(ConnectionHandle {
            id,
            key: key.clone(),
            connection,
        })
    }

    /// Build the listener registered on every new connection: errors
    /// are logged, a close removes the connection from the pool.
    fn listener(&self, key: IdentityKey, id: u64) -> ConnectionListener {
        let inner = Arc::downgrade(&self.inner);

        Arc::new(move |event: &ConnectionEvent| match event {
            ConnectionEvent::Error(err) => {
                warn!(%key, id, "imap connection error: {err}");
            }
            ConnectionEvent::Closed => {
                if let Some(inner) = inner.upgrade() {
                    if inner.remove(&key, id).is_some() {
                        debug!(%key, id, "imap connection closed, removed from pool");
                    }
                }
            }
            _ => (),
        })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
