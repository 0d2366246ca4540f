//! Group configuration: one named deployment unit and its topology

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool_config::PoolConfig;
use crate::utils::ConfigError;

/// Name used when a group does not specify one
pub const DEFAULT_GROUP_NAME: &str = "default";

/// Characters accepted between entries of a `servers` string
const SERVER_DELIMITERS: &[char] = &[',', ';', ' ', '\t', '\n', '\r'];

/// Deployment shape of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// One node
    Standalone,
    /// Client-side hashing over independent nodes
    Sharded,
    /// Server-side slot routing
    Cluster,
}

impl TopologyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::Standalone => "standalone",
            TopologyKind::Sharded => "sharded",
            TopologyKind::Cluster => "cluster",
        }
    }

    /// Whether multi-key commands may span arbitrary keys
    pub fn supports_multi_key(&self) -> bool {
        !matches!(self, TopologyKind::Cluster)
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standalone" | "standard" => Ok(TopologyKind::Standalone),
            "sharded" | "shard" => Ok(TopologyKind::Sharded),
            "cluster" => Ok(TopologyKind::Cluster),
            _ => Err(ConfigError::UnsupportedTopology(s.to_string())),
        }
    }
}

/// A validated `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    /// Accepts `<non-empty host>:<1-5 digit port>`, trailing whitespace allowed
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ConfigError::MalformedEndpoint(s.to_string());

        let (host, port) = s.trim().rsplit_once(':').ok_or_else(malformed)?;
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(malformed());
        }
        if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let port: u16 = port.parse().map_err(|_| malformed())?;
        if port == 0 {
            return Err(malformed());
        }

        Ok(Endpoint::new(host, port))
    }
}

/// `servers` may be written as one delimited string or as a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerList {
    Joined(String),
    List(Vec<String>),
}

impl ServerList {
    fn entries(&self) -> Vec<&str> {
        match self {
            ServerList::Joined(s) => s
                .split(SERVER_DELIMITERS)
                .filter(|t| !t.trim().is_empty())
                .collect(),
            ServerList::List(items) => items
                .iter()
                .map(|s| s.as_str())
                .filter(|t| !t.trim().is_empty())
                .collect(),
        }
    }
}

/// Raw, unvalidated group settings as they appear in a config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSettings {
    #[serde(default, alias = "group_name", alias = "name")]
    pub group: Option<String>,
    #[serde(default, alias = "topology")]
    pub mode: Option<String>,
    #[serde(default, alias = "endpoints")]
    pub servers: Option<ServerList>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default, alias = "timeout_ms")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub database: Option<u32>,
}

impl GroupSettings {
    pub fn new(mode: &str, servers: &[&str]) -> Self {
        Self {
            mode: Some(mode.to_string()),
            servers: Some(ServerList::List(
                servers.iter().map(|s| s.to_string()).collect(),
            )),
            pool: Some(PoolConfig::default()),
            ..Default::default()
        }
    }

    pub fn group(mut self, name: &str) -> Self {
        self.group = Some(name.to_string());
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn auth(mut self, password: &str, username: Option<&str>) -> Self {
        self.password = Some(password.to_string());
        self.username = username.map(String::from);
        self
    }

    pub fn database(mut self, db: u32) -> Self {
        self.database = Some(db);
        self
    }

    /// Validate into an immutable `GroupConfig`
    pub fn validate(self) -> Result<GroupConfig, ConfigError> {
        GroupConfig::try_from(self)
    }
}

/// Validated, immutable description of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    name: String,
    kind: TopologyKind,
    endpoints: Vec<Endpoint>,
    pool: PoolConfig,
    connect_timeout: Duration,
    read_timeout: Duration,
    password: Option<String>,
    username: Option<String>,
    database: Option<u32>,
}

impl GroupConfig {
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
    pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;

    /// Shorthand for a group with default pool settings
    pub fn new(name: &str, mode: &str, servers: &[&str]) -> Result<Self, ConfigError> {
        GroupSettings::new(mode, servers).group(name).validate()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn database(&self) -> Option<u32> {
        self.database
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_GROUP_NAME
    }
}

impl TryFrom<GroupSettings> for GroupConfig {
    type Error = ConfigError;

    fn try_from(settings: GroupSettings) -> Result<Self, Self::Error> {
        let name = settings
            .group
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_GROUP_NAME)
            .to_string();

        let mode = settings
            .mode
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or(ConfigError::MissingField("mode"))?;
        let kind: TopologyKind = mode.parse()?;

        let servers = settings
            .servers
            .as_ref()
            .map(ServerList::entries)
            .filter(|entries| !entries.is_empty())
            .ok_or(ConfigError::MissingField("servers"))?;
        let endpoints = servers
            .into_iter()
            .map(Endpoint::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        let pool = settings.pool.ok_or(ConfigError::MissingField("pool"))?;
        pool.validate(&name)?;

        let invalid = |reason: &str| ConfigError::InvalidTopology {
            group: name.clone(),
            reason: reason.to_string(),
        };
        if kind == TopologyKind::Standalone && endpoints.len() != 1 {
            return Err(invalid("standalone mode takes exactly one server"));
        }
        if kind == TopologyKind::Cluster && settings.database.unwrap_or(0) != 0 {
            return Err(invalid("cluster mode only supports database 0"));
        }
        if settings.username.is_some() && settings.password.is_none() {
            return Err(ConfigError::MissingField("password"));
        }

        Ok(GroupConfig {
            name,
            kind,
            endpoints,
            pool,
            connect_timeout: Duration::from_millis(
                settings
                    .connect_timeout_ms
                    .unwrap_or(Self::DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(
                settings
                    .read_timeout_ms
                    .unwrap_or(Self::DEFAULT_READ_TIMEOUT_MS),
            ),
            password: settings.password,
            username: settings.username,
            database: settings.database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_accepts_strict_shape() {
        let ep: Endpoint = "127.0.0.1:6379".parse().unwrap();
        assert_eq!(ep, Endpoint::new("127.0.0.1", 6379));

        let ep: Endpoint = "cache.internal:7000  ".parse().unwrap();
        assert_eq!(ep.host, "cache.internal");
        assert_eq!(ep.port, 7000);

        let ep: Endpoint = "[::1]:6380".parse().unwrap();
        assert_eq!(ep.host, "[::1]");
        assert_eq!(ep.to_string(), "[::1]:6380");
    }

    #[test]
    fn test_endpoint_rejects_malformed() {
        for bad in [
            "localhost",
            ":6379",
            "host:",
            "host:port",
            "host:123456",
            "host:70000",
            "host:0",
            "my host:6379",
        ] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(ConfigError::MalformedEndpoint(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_topology_kind_parsing() {
        assert_eq!("standard".parse::<TopologyKind>().unwrap(), TopologyKind::Standalone);
        assert_eq!("Standalone".parse::<TopologyKind>().unwrap(), TopologyKind::Standalone);
        assert_eq!("shard".parse::<TopologyKind>().unwrap(), TopologyKind::Sharded);
        assert_eq!(" CLUSTER ".parse::<TopologyKind>().unwrap(), TopologyKind::Cluster);
        assert_eq!(
            "sentinel".parse::<TopologyKind>().unwrap_err(),
            ConfigError::UnsupportedTopology("sentinel".to_string())
        );
    }

    #[test]
    fn test_group_name_defaults_to_sentinel() {
        let config = GroupSettings::new("standalone", &["127.0.0.1:6379"])
            .validate()
            .unwrap();
        assert_eq!(config.name(), DEFAULT_GROUP_NAME);
        assert!(config.is_default());

        let config = GroupSettings::new("standalone", &["127.0.0.1:6379"])
            .group("   ")
            .validate()
            .unwrap();
        assert_eq!(config.name(), DEFAULT_GROUP_NAME);
    }

    #[test]
    fn test_joined_servers_are_tokenized() {
        let settings = GroupSettings {
            mode: Some("sharded".into()),
            servers: Some(ServerList::Joined(
                "10.0.0.1:6379, 10.0.0.2:6379;10.0.0.3:6379\n".into(),
            )),
            pool: Some(PoolConfig::default()),
            ..Default::default()
        };
        let config = settings.validate().unwrap();
        assert_eq!(config.kind(), TopologyKind::Sharded);
        assert_eq!(config.endpoints().len(), 3);
        assert_eq!(config.endpoints()[2], Endpoint::new("10.0.0.3", 6379));
    }

    #[test]
    fn test_missing_fields_are_fatal() {
        let mut settings = GroupSettings::new("cluster", &["10.0.0.1:7000"]);
        settings.pool = None;
        assert_eq!(settings.validate().unwrap_err(), ConfigError::MissingField("pool"));

        let mut settings = GroupSettings::new("cluster", &["10.0.0.1:7000"]);
        settings.mode = None;
        assert_eq!(settings.validate().unwrap_err(), ConfigError::MissingField("mode"));

        let settings = GroupSettings::new("cluster", &[]);
        assert_eq!(
            settings.validate().unwrap_err(),
            ConfigError::MissingField("servers")
        );
    }

    #[test]
    fn test_standalone_requires_single_server() {
        let err = GroupConfig::new("default", "standalone", &["a:1", "b:2"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology { .. }));
    }

    #[test]
    fn test_cluster_rejects_database_selection() {
        let err = GroupSettings::new("cluster", &["10.0.0.1:7000"])
            .database(3)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology { .. }));
    }

    #[test]
    fn test_timeouts_and_auth() {
        let config = GroupSettings::new("standalone", &["127.0.0.1:6379"])
            .connect_timeout_ms(150)
            .auth("secret", Some("app"))
            .database(2)
            .validate()
            .unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(150));
        assert_eq!(config.read_timeout(), Duration::from_millis(2000));
        assert_eq!(config.password(), Some("secret"));
        assert_eq!(config.username(), Some("app"));
        assert_eq!(config.database(), Some(2));
    }
}
