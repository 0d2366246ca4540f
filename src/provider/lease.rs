//! Thread-bound connection leases

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use super::backend::{RedisConnection, TopologyBackend};
use super::Provider;
use crate::client::Commands;
use crate::utils::{ConnectionError, RespValue};

static NEXT_LEASE_ID: AtomicU64 = AtomicU64::new(1);

/// A pooled connection bound to one thread until released
///
/// After release the handle is detached: every operation fails with
/// `ConnectionError::Released`.
pub struct LeasedConnection<C> {
    id: u64,
    conn: Mutex<Option<C>>,
    broken: AtomicBool,
}

/// Shared handle to the calling thread's leased connection
pub type Lease<C = RedisConnection> = Arc<LeasedConnection<C>>;

impl<C> LeasedConnection<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            id: NEXT_LEASE_ID.fetch_add(1, Ordering::Relaxed),
            conn: Mutex::new(Some(conn)),
            broken: AtomicBool::new(false),
        }
    }

    /// Unique per lease, never reused
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.conn.lock().is_none()
    }

    /// Destroy the connection on release instead of pooling it
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Relaxed);
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    /// Run `f` against the connection; a fatal error marks the lease broken
    pub fn run<R, F>(&self, f: F) -> Result<R, ConnectionError>
    where
        F: FnOnce(&mut C) -> Result<R, ConnectionError>,
    {
        let mut slot = self.conn.lock();
        let conn = slot.as_mut().ok_or(ConnectionError::Released)?;
        let result = f(conn);
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.mark_broken();
            }
        }
        result
    }

    pub(crate) fn take(&self) -> Option<C> {
        self.conn.lock().take()
    }
}

impl<C: Commands> LeasedConnection<C> {
    pub fn execute(&self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        self.run(|conn| conn.execute(args))
    }

    pub fn execute_str(&self, args: &[&str]) -> Result<RespValue, ConnectionError> {
        self.run(|conn| conn.execute_str(args))
    }
}

/// `ThreadId → Lease` map; each thread only touches its own entry
pub(crate) struct LeaseCache<C> {
    bound: Mutex<HashMap<ThreadId, Lease<C>>>,
}

impl<C> LeaseCache<C> {
    pub fn new() -> Self {
        Self {
            bound: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, thread: ThreadId) -> Option<Lease<C>> {
        self.bound.lock().get(&thread).cloned()
    }

    pub fn bind(&self, thread: ThreadId, lease: Lease<C>) {
        self.bound.lock().insert(thread, lease);
    }

    pub fn unbind(&self, thread: ThreadId) -> Option<Lease<C>> {
        self.bound.lock().remove(&thread)
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.bound.lock().contains_key(&thread)
    }

    pub fn len(&self) -> usize {
        self.bound.lock().len()
    }
}

/// Scope around a lease
///
/// Releases on drop only when this guard created the binding, so nested
/// scopes on one thread share a connection and release it once.
pub struct LeaseGuard<'a, B: TopologyBackend> {
    provider: &'a Provider<B>,
    lease: Lease<B::Connection>,
    owns_binding: bool,
}

impl<'a, B: TopologyBackend> LeaseGuard<'a, B> {
    pub(crate) fn new(provider: &'a Provider<B>, lease: Lease<B::Connection>, owns_binding: bool) -> Self {
        Self {
            provider,
            lease,
            owns_binding,
        }
    }

    pub fn lease(&self) -> &Lease<B::Connection> {
        &self.lease
    }

    pub fn owns_binding(&self) -> bool {
        self.owns_binding
    }
}

impl<B: TopologyBackend> Deref for LeaseGuard<'_, B> {
    type Target = LeasedConnection<B::Connection>;

    fn deref(&self) -> &Self::Target {
        &self.lease
    }
}

impl<B: TopologyBackend> Drop for LeaseGuard<'_, B> {
    fn drop(&mut self) {
        if self.owns_binding {
            self.provider.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionManager;
    use crate::testing::MockManager;
    use std::thread;

    #[test]
    fn test_lease_ids_are_unique() {
        let a = LeasedConnection::new(());
        let b = LeasedConnection::new(());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_released_handle_is_detached() {
        let manager = MockManager::standalone();
        let lease = LeasedConnection::new(manager.connect().unwrap());
        assert_eq!(lease.execute_str(&["PING"]).unwrap().as_str(), Some("PONG"));

        let conn = lease.take();
        assert!(conn.is_some());
        assert!(lease.is_released());
        assert!(matches!(
            lease.execute_str(&["PING"]),
            Err(ConnectionError::Released)
        ));
    }

    #[test]
    fn test_fatal_error_marks_broken() {
        let manager = MockManager::standalone();
        let lease = LeasedConnection::new(manager.connect().unwrap());

        assert!(lease.execute_str(&["SET", "k", "v"]).is_ok());
        assert!(!lease.is_broken());

        assert!(lease.execute_str(&["BREAK"]).is_err());
        assert!(lease.is_broken());
    }

    #[test]
    fn test_cache_is_keyed_by_thread() {
        let cache: LeaseCache<u32> = LeaseCache::new();
        let here = thread::current().id();
        cache.bind(here, Arc::new(LeasedConnection::new(1)));

        let there = thread::spawn(|| thread::current().id()).join().unwrap();
        assert!(cache.contains(here));
        assert!(!cache.contains(there));
        assert!(cache.get(there).is_none());

        assert!(cache.unbind(here).is_some());
        assert!(cache.unbind(here).is_none());
        assert_eq!(cache.len(), 0);
    }
}
