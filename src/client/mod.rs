//! Client connection layer

pub mod commands;
pub mod pool;
pub mod raw_connection;
pub mod sharded;

pub use commands::{Commands, CommandsExt};
pub use pool::{ConnectionManager, Pool, PoolStats};
pub use raw_connection::{ConnectionFactory, RawConnection};
pub use sharded::{ShardRing, ShardedConnection};
