//! Blocking connection pool
//!
//! A bounded pool of connections produced by a `ConnectionManager`:
//! - at most `max_total` live connections (idle + borrowed)
//! - borrowers wait on a condvar up to `borrow_timeout_ms`
//! - up to `max_idle` connections are kept for reuse (LIFO)
//! - optional validation on borrow and return
//!
//! Slot accounting is reserved before a connect and given back if the connect
//! fails, so a failed borrow never consumes capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::utils::{ConnectionError, LeaseError};

/// Creates and checks the connections held by a `Pool`
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection
    fn connect(&self) -> Result<Self::Connection, ConnectionError>;

    /// Cheap liveness check (typically PING)
    fn is_valid(&self, conn: &mut Self::Connection) -> bool;
}

struct IdleConnection<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    /// Idle plus borrowed plus connects in flight
    total: usize,
    closed: bool,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub max_total: usize,
    pub created: u64,
    pub destroyed: u64,
    pub borrowed: u64,
    pub exhausted: u64,
    pub closed: bool,
}

pub struct Pool<M: ConnectionManager> {
    name: String,
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    available: Condvar,
    created: AtomicU64,
    destroyed: AtomicU64,
    borrowed: AtomicU64,
    exhausted: AtomicU64,
}

impl<M: ConnectionManager> Pool<M> {
    /// No connections are opened here; see `ensure_min_idle`
    pub fn new(name: impl Into<String>, manager: M, config: PoolConfig) -> Self {
        Self {
            name: name.into(),
            manager,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                closed: false,
            }),
            available: Condvar::new(),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            borrowed: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take a connection, waiting up to the borrow timeout when exhausted
    pub fn borrow(&self) -> Result<M::Connection, LeaseError> {
        let started = Instant::now();
        let deadline = started + self.config.borrow_timeout();

        loop {
            let mut state = self.state.lock();

            loop {
                if state.closed {
                    return Err(self.shutdown_error());
                }
                if !state.idle.is_empty() || state.total < self.config.max_total {
                    break;
                }
                if !self.config.block_when_exhausted {
                    return Err(self.exhausted_error(started.elapsed()));
                }
                if self.available.wait_until(&mut state, deadline).timed_out()
                    && !state.closed
                    && state.idle.is_empty()
                    && state.total >= self.config.max_total
                {
                    return Err(self.exhausted_error(started.elapsed()));
                }
            }

            if let Some(IdleConnection { mut conn, since }) = state.idle.pop_front() {
                drop(state);

                if self.is_expired(since) {
                    debug!(pool = %self.name, "Idle connection expired, discarding");
                    self.destroy(conn);
                    continue;
                }
                if self.config.test_on_borrow && !self.manager.is_valid(&mut conn) {
                    debug!(pool = %self.name, "Idle connection failed validation, discarding");
                    self.destroy(conn);
                    continue;
                }

                self.borrowed.fetch_add(1, Ordering::Relaxed);
                return Ok(conn);
            }

            // Reserve the slot before connecting outside the lock
            state.total += 1;
            drop(state);

            return match self.manager.connect() {
                Ok(conn) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    self.borrowed.fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %self.name, "Opened new pooled connection");
                    Ok(conn)
                }
                Err(e) => {
                    self.release_slot();
                    warn!(pool = %self.name, error = %e, "Failed to open pooled connection");
                    Err(LeaseError::Connection(e))
                }
            };
        }
    }

    /// Return a healthy connection for reuse
    pub fn give_back(&self, mut conn: M::Connection) {
        if self.config.test_on_return && !self.manager.is_valid(&mut conn) {
            debug!(pool = %self.name, "Returned connection failed validation, discarding");
            self.destroy(conn);
            return;
        }

        let mut state = self.state.lock();
        if state.closed || state.idle.len() >= self.config.max_idle {
            state.total -= 1;
            drop(state);
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            self.available.notify_one();
            drop(conn);
            return;
        }

        state.idle.push_front(IdleConnection {
            conn,
            since: Instant::now(),
        });
        drop(state);
        self.available.notify_one();
    }

    /// Close a borrowed connection instead of returning it
    pub fn invalidate(&self, conn: M::Connection) {
        self.destroy(conn);
    }

    /// Open connections until `min_idle` are idle; returns how many were opened
    pub fn ensure_min_idle(&self) -> Result<usize, ConnectionError> {
        let mut opened = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed
                    || state.idle.len() >= self.config.min_idle
                    || state.total >= self.config.max_total
                {
                    return Ok(opened);
                }
                state.total += 1;
            }

            match self.manager.connect() {
                Ok(conn) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    opened += 1;
                    let mut state = self.state.lock();
                    state.idle.push_front(IdleConnection {
                        conn,
                        since: Instant::now(),
                    });
                    drop(state);
                    self.available.notify_one();
                }
                Err(e) => {
                    self.release_slot();
                    return Err(e);
                }
            }
        }
    }

    /// Reject further borrows and close idle connections
    ///
    /// Connections still borrowed are closed when they come back.
    pub fn close(&self) {
        let drained: Vec<IdleConnection<M::Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };

        self.destroyed
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        self.available.notify_all();
        info!(pool = %self.name, closed_idle = drained.len(), "Pool closed");
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.total - state.idle.len(),
            max_total: self.config.max_total,
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            closed: state.closed,
        }
    }

    fn is_expired(&self, since: Instant) -> bool {
        self.config
            .idle_timeout()
            .map(|timeout| since.elapsed() > timeout)
            .unwrap_or(false)
    }

    fn destroy(&self, conn: M::Connection) {
        drop(conn);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        self.release_slot();
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total -= 1;
        drop(state);
        self.available.notify_one();
    }

    fn exhausted_error(&self, waited: Duration) -> LeaseError {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(
            pool = %self.name,
            waited_ms = waited.as_millis() as u64,
            max_total = self.config.max_total,
            "Pool exhausted"
        );
        LeaseError::PoolExhausted {
            group: self.name.clone(),
            waited_ms: waited.as_millis() as u64,
        }
    }

    fn shutdown_error(&self) -> LeaseError {
        LeaseError::Shutdown {
            group: self.name.clone(),
        }
    }
}
