//! Error types for valkey-groups

use std::io;
use thiserror::Error;

/// Top-level error
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Fatal wiring errors raised at registration or bootstrap time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Malformed endpoint '{0}': expected host:port")]
    MalformedEndpoint(String),

    #[error("Unsupported topology mode '{0}'")]
    UnsupportedTopology(String),

    #[error("Invalid topology for group [{group}]: {reason}")]
    InvalidTopology { group: String, reason: String },

    #[error("Invalid pool configuration for group [{group}]: {reason}")]
    InvalidPool { group: String, reason: String },

    #[error("Group [{0}] is already registered")]
    DuplicateGroup(String),

    #[error("Cannot register group [{0}]: registry is already ready")]
    RegistrationClosed(String),

    #[error("No default provider: register a group named 'default' ({registered} groups registered)")]
    NoDefaultProvider { registered: usize },

    #[error("Registry is not ready yet")]
    NotReady,

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection closed unexpectedly")]
    Closed,

    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    /// Well-formed reply of the wrong type; the socket stays usable
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Connection has already been released")]
    Released,
}

impl ConnectionError {
    /// Whether the underlying socket can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Closed
                | ConnectionError::Io(_)
                | ConnectionError::Timeout(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::ConnectFailed { .. }
        )
    }
}

/// Cluster-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Failed to parse CLUSTER NODES response: {0}")]
    ParseFailed(String),

    #[error("No primary nodes found in cluster")]
    NoPrimaries,

    #[error("Slot {0} has no assigned node")]
    UnassignedSlot(u16),

    #[error("Too many redirections ({0})")]
    TooManyRedirects(usize),

    #[error("No seed node reachable")]
    NoReachableSeed,
}

/// Errors raised to the caller of `lease()`
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Pool for group [{group}] exhausted after waiting {waited_ms}ms")]
    PoolExhausted { group: String, waited_ms: u64 },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Provider for group [{group}] has been shut down")]
    Shutdown { group: String },
}

pub type Result<T> = std::result::Result<T, ProviderError>;
