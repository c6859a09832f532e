//! # Connection context
//!
//! A [`ConnectionContext`] lets independently constructed
//! [`MailClient`](crate::MailClient)s of the same identity share one
//! checked-out connection for the duration of a workflow. The first
//! client that needs a connection registers it into the context, the
//! following ones reuse it, and releases are deferred until the
//! context is torn down.
//!
//! A context can be handed explicitly to clients with
//! [`MailClient::with_context`](crate::MailClient::with_context), or
//! established ambiently for the current task with
//! [`with_connection_context`]. The ambient slot is task-local: it is
//! neither visible from spawned tasks nor from other tasks of the
//! same thread.
//!
//! Clients sharing a context must run one after the other, since
//! they share the selected folder of the connection.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tracing::debug;

use crate::pool::{ConnectionHandle, ConnectionPool, IdentityKey};

tokio::task_local! {
    static CURRENT: ConnectionContext;
}

struct ContextInner {
    key: IdentityKey,
    pool: ConnectionPool,
    connection: Mutex<Option<ConnectionHandle>>,
    closed: AtomicBool,

    /// The context that was current when this one was established.
    parent: Option<ConnectionContext>,
}

/// The connection context of one identity.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<ContextInner>,
}

impl ConnectionContext {
    /// Create a detached context, to be passed explicitly to clients.
    ///
    /// The caller is responsible for calling
    /// [`ConnectionContext::teardown`] once the workflow is over.
    pub fn new(pool: &ConnectionPool, user_id: impl ToString, account_id: impl ToString) -> Self {
        Self::with_parent(pool, IdentityKey::new(user_id, account_id), None)
    }

    fn with_parent(pool: &ConnectionPool, key: IdentityKey, parent: Option<Self>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                key,
                pool: pool.clone(),
                connection: Mutex::new(None),
                closed: AtomicBool::new(false),
                parent,
            }),
        }
    }

    /// Return the innermost context established for the current task.
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Return the context established for the current task and the
    /// given identity, walking up nested contexts.
    pub fn current_for(key: &IdentityKey) -> Option<Self> {
        Self::current().and_then(|ctx| ctx.find(key))
    }

    fn find(&self, key: &IdentityKey) -> Option<Self> {
        let mut ctx = Some(self.clone());

        while let Some(current) = ctx {
            if current.key() == key {
                return Some(current);
            }

            ctx = current.inner.parent.clone();
        }

        None
    }

    pub fn key(&self) -> &IdentityKey {
        &self.inner.key
    }

    /// Return `true` until the context is torn down.
    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire)
    }

    /// Return the registered connection, if it is still usable.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        if !self.is_active() {
            return None;
        }

        self.slot().clone().filter(|conn| conn.is_usable())
    }

    /// Register a connection freshly checked out by a client.
    ///
    /// Return the connection the client should use from now on: the
    /// given one, or the one registered in the meantime, in which
    /// case the given one is released. Return `None` if the context is
    /// already torn down: the client keeps ownership of its
    /// connection.
    pub(crate) fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut slot = self.slot();

        if !self.is_active() {
            return None;
        }

        if let Some(registered) = slot.as_ref().filter(|conn| conn.is_usable()) {
            let registered = registered.clone();
            self.inner.pool.release_connection(&handle);
            return Some(registered);
        }

        if let Some(stale) = slot.take() {
            self.inner.pool.release_connection(&stale);
        }

        debug!(key = %self.inner.key, id = handle.id(), "connection registered into context");
        *slot = Some(handle.clone());
        Some(handle)
    }

    /// Drop the registered connection if it is the given one, without
    /// releasing it. The next client gets a fresh connection.
    pub(crate) fn forget(&self, handle: &ConnectionHandle) {
        let mut slot = self.slot();

        if slot.as_ref().is_some_and(|conn| conn.id() == handle.id()) {
            debug!(key = %self.inner.key, id = handle.id(), "connection forgotten by context");
            *slot = None;
        }
    }

    /// Close the context and give its connection back to the pool.
    ///
    /// Calling it more than once has no effect.
    pub fn teardown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.slot().take() {
            debug!(key = %self.inner.key, id = handle.id(), "releasing connection of context");
            self.inner.pool.release_connection(&handle);
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("key", &self.inner.key)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Tears the context down when dropped, whether the workflow
/// completed, failed, panicked or got cancelled.
struct TeardownGuard(ConnectionContext);

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.0.teardown();
    }
}

/// Run the given workflow within a connection context for the given
/// identity.
///
/// Every client of this identity used within the workflow, on the
/// current task, shares one connection. The connection is released
/// once the workflow ends.
///
/// Contexts for different identities can be nested.
///
/// # Panics
///
/// Panics if a context for the same identity is already established
/// for the current task.
pub async fn with_connection_context<F, Fut, T>(
    pool: &ConnectionPool,
    user_id: impl ToString,
    account_id: impl ToString,
    workflow: F,
) -> T
where
    F: FnOnce(ConnectionContext) -> Fut,
    Fut: Future<Output = T>,
{
    let key = IdentityKey::new(user_id, account_id);
    let parent = ConnectionContext::current();

    if parent.as_ref().and_then(|ctx| ctx.find(&key)).is_some() {
        panic!("connection context for {key} already established for the current task");
    }

    let ctx = ConnectionContext::with_parent(pool, key, parent);
    let _guard = TeardownGuard(ctx.clone());

    CURRENT.scope(ctx.clone(), workflow(ctx)).await
}
