//! TOML groups file
//!
//! ```toml
//! [[groups]]
//! group = "default"
//! mode = "standalone"
//! servers = "127.0.0.1:6379"
//!
//! [groups.pool]
//! max_total = 16
//! ```

use std::path::Path;

use serde::Deserialize;

use super::group_config::GroupSettings;
use crate::utils::ConfigError;

/// Top-level layout of a groups file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupsFile {
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
}

impl GroupsFile {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }
}
