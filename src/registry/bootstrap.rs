//! One-shot build barrier
//!
//! Resolvers block until `signal_ready` fires. The first one past the gate
//! runs the build; everyone else, concurrently or later, sees the memoised
//! outcome. A failed build is never retried.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::utils::ConfigError;

pub struct BootstrapGate<T> {
    ready: Mutex<bool>,
    ready_signal: Condvar,
    built: OnceLock<Result<Arc<T>, ConfigError>>,
    builds: AtomicUsize,
}

impl<T> BootstrapGate<T> {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            ready_signal: Condvar::new(),
            built: OnceLock::new(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Open the gate; returns false if it was already open
    pub fn signal_ready(&self) -> bool {
        let mut ready = self.ready.lock();
        if *ready {
            return false;
        }
        *ready = true;
        self.ready_signal.notify_all();
        true
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    pub fn is_built(&self) -> bool {
        self.built.get().is_some()
    }

    /// Block until `signal_ready`
    pub fn wait_ready(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.ready_signal.wait(&mut ready);
        }
    }

    /// Block until `signal_ready` or the timeout; returns whether the gate is open
    pub fn wait_ready_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while !*ready {
            if self.ready_signal.wait_until(&mut ready, deadline).timed_out() {
                return *ready;
            }
        }
        true
    }

    /// Wait for readiness, then return the built value, building it first if
    /// no other caller has
    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<T>, ConfigError>
    where
        F: FnOnce() -> Result<T, ConfigError>,
    {
        if let Some(outcome) = self.built.get() {
            return outcome.clone();
        }

        if !self.is_ready() {
            debug!("Waiting for readiness signal");
            self.wait_ready();
        }
        self.build_once(build)
    }

    /// Like `get_or_build` but fails with `NotReady` instead of blocking
    pub fn try_get_or_build<F>(&self, build: F) -> Result<Arc<T>, ConfigError>
    where
        F: FnOnce() -> Result<T, ConfigError>,
    {
        if let Some(outcome) = self.built.get() {
            return outcome.clone();
        }
        if !self.is_ready() {
            return Err(ConfigError::NotReady);
        }
        self.build_once(build)
    }

    /// How many times a build ran; at most one
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn build_once<F>(&self, build: F) -> Result<Arc<T>, ConfigError>
    where
        F: FnOnce() -> Result<T, ConfigError>,
    {
        self.built
            .get_or_init(|| {
                self.builds.fetch_add(1, Ordering::SeqCst);
                build().map(Arc::new)
            })
            .clone()
    }
}

impl<T> Default for BootstrapGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
