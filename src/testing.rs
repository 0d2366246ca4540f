//! In-memory connection manager and log capture for tests

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::{Commands, ConnectionManager};
use crate::config::{GroupConfig, TopologyKind};
use crate::provider::TopologyBackend;
use crate::utils::{ConfigError, ConnectionError, RespValue};

/// Hands out `MockConnection`s and counts how many are alive
pub struct MockManager {
    kind: TopologyKind,
    next_id: AtomicU64,
    connects: AtomicU64,
    fail: AtomicBool,
    valid: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl MockManager {
    pub fn new(kind: TopologyKind) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            connects: AtomicU64::new(0),
            fail: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn standalone() -> Self {
        Self::new(TopologyKind::Standalone)
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Connections created and not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ConnectionManager for MockManager {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectFailed {
                host: "mock".to_string(),
                port: 0,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            live: Arc::clone(&self.live),
            executed: Vec::new(),
        })
    }

    fn is_valid(&self, _conn: &mut MockConnection) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

impl TopologyBackend for MockManager {
    fn from_config(config: &GroupConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.kind()))
    }

    fn topology_kind(&self) -> TopologyKind {
        self.kind
    }
}

/// Answers PING with PONG, BREAK with a closed socket, anything else with OK
#[derive(Debug)]
pub struct MockConnection {
    pub id: u64,
    live: Arc<AtomicUsize>,
    pub executed: Vec<String>,
}

impl Commands for MockConnection {
    fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        let name = args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
            .unwrap_or_default();
        self.executed.push(name.clone());
        match name.as_str() {
            "PING" => Ok(RespValue::SimpleString("PONG".to_string())),
            "BREAK" => Err(ConnectionError::Closed),
            _ => Ok(RespValue::SimpleString("OK".to_string())),
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Collects formatted `tracing` output emitted on the current thread
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Run `f` with this capture installed as the thread's subscriber
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
