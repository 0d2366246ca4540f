//! Utility modules

pub mod error;
pub mod resp;

pub use error::{ClusterError, ConfigError, ConnectionError, LeaseError, ProviderError, Result};
pub use resp::{RespDecoder, RespEncoder, RespValue};
