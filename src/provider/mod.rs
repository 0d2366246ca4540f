//! Per-group topology providers
//!
//! A `Provider` owns one group's pool and hands each calling thread at most
//! one leased connection at a time. It is topology-blind: routing lives in
//! the connection types chosen by the `Backend`.

pub mod backend;
pub mod lease;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, trace};

use crate::client::{Pool, PoolStats};
use crate::config::{GroupConfig, TopologyKind};
use crate::utils::{ConfigError, ConnectionError, LeaseError};

pub use backend::{
    Backend, ClusterBackend, RedisConnection, ShardedBackend, StandaloneBackend, TopologyBackend,
};
pub use lease::{Lease, LeaseGuard, LeasedConnection};

use lease::LeaseCache;

pub struct Provider<B: TopologyBackend = Backend> {
    config: GroupConfig,
    pool: Pool<B>,
    leases: LeaseCache<B::Connection>,
    shut_down: AtomicBool,
}

impl<B: TopologyBackend> Provider<B> {
    /// Build the backend for `config`; no connections are opened
    pub fn new(config: GroupConfig) -> Result<Self, ConfigError> {
        let backend = B::from_config(&config)?;
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: GroupConfig, backend: B) -> Self {
        let pool = Pool::new(config.name(), backend, config.pool().clone());
        Self {
            config,
            pool,
            leases: LeaseCache::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// The calling thread's connection, borrowing and binding one if needed
    ///
    /// Repeated calls on one thread return the same lease until `release`.
    /// Fails once the provider is shut down, even for a thread still bound.
    pub fn lease(&self) -> Result<Lease<B::Connection>, LeaseError> {
        if self.is_shut_down() {
            return Err(LeaseError::Shutdown {
                group: self.group_name().to_string(),
            });
        }

        let thread = thread::current().id();
        if let Some(lease) = self.leases.get(thread) {
            trace!(group = %self.group_name(), lease_id = lease.id(), "Reusing bound lease");
            return Ok(lease);
        }

        let conn = self.pool.borrow()?;
        let lease = Arc::new(LeasedConnection::new(conn));
        self.leases.bind(thread, Arc::clone(&lease));
        debug!(group = %self.group_name(), lease_id = lease.id(), "Leased connection");
        Ok(lease)
    }

    /// Unbind the calling thread's lease and return it to the pool
    ///
    /// No-op when nothing is bound. Broken connections are destroyed.
    pub fn release(&self) {
        let Some(lease) = self.leases.unbind(thread::current().id()) else {
            return;
        };

        if let Some(conn) = lease.take() {
            if lease.is_broken() {
                debug!(group = %self.group_name(), lease_id = lease.id(), "Destroying broken connection");
                self.pool.invalidate(conn);
            } else {
                self.pool.give_back(conn);
                debug!(group = %self.group_name(), lease_id = lease.id(), "Released connection");
            }
        }
    }

    /// Lease for the lifetime of the returned guard
    pub fn scope(&self) -> Result<LeaseGuard<'_, B>, LeaseError> {
        let owns_binding = !self.has_lease();
        let lease = self.lease()?;
        Ok(LeaseGuard::new(self, lease, owns_binding))
    }

    /// Run `f` with the calling thread's connection, releasing afterwards
    /// unless an outer scope holds the lease
    pub fn with_connection<R, F>(&self, f: F) -> Result<R, LeaseError>
    where
        F: FnOnce(&mut B::Connection) -> Result<R, ConnectionError>,
    {
        let guard = self.scope()?;
        Ok(guard.run(f)?)
    }

    /// Whether the calling thread currently holds a lease
    pub fn has_lease(&self) -> bool {
        self.leases.contains(thread::current().id())
    }

    /// Number of threads holding a lease
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    pub fn topology_kind(&self) -> TopologyKind {
        self.pool.manager().topology_kind()
    }

    pub fn group_name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        self.pool.manager()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Open connections up to the pool's `min_idle`
    pub fn warm_up(&self) -> Result<usize, ConnectionError> {
        self.pool.ensure_min_idle()
    }

    /// Close the pool; outstanding leases are destroyed when released
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.close();
        info!(
            group = %self.group_name(),
            outstanding = self.active_leases(),
            "Provider shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
