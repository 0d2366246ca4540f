//! Configuration module

pub mod cli;
pub mod file;
pub mod group_config;
pub mod pool_config;

pub use cli::CliArgs;
pub use file::GroupsFile;
pub use group_config::{
    Endpoint, GroupConfig, GroupSettings, ServerList, TopologyKind, DEFAULT_GROUP_NAME,
};
pub use pool_config::PoolConfig;
