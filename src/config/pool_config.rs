//! Connection pool tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::ConfigError;

/// Pool tuning for one group
///
/// Field names follow the commons-pool vocabulary (`max_total` is what older
/// configs call `maxActive`), which is also accepted as an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Upper bound on live connections (idle + leased)
    #[serde(default = "default_max_total", alias = "max_active")]
    pub max_total: usize,
    /// Idle connections kept for reuse; extra returns are closed
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    /// Idle connections opened eagerly during bootstrap
    #[serde(default)]
    pub min_idle: usize,
    /// How long `lease()` waits for a free connection
    #[serde(default = "default_borrow_timeout_ms", alias = "max_wait_ms")]
    pub borrow_timeout_ms: u64,
    /// Fail immediately instead of waiting when the pool is exhausted
    #[serde(default = "default_block_when_exhausted")]
    pub block_when_exhausted: bool,
    /// PING idle connections before handing them out
    #[serde(default)]
    pub test_on_borrow: bool,
    /// PING connections when they come back
    #[serde(default)]
    pub test_on_return: bool,
    /// Idle connections older than this are closed on borrow (0 disables)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_max_total() -> usize {
    8
}

fn default_max_idle() -> usize {
    8
}

fn default_borrow_timeout_ms() -> u64 {
    3000
}

fn default_block_when_exhausted() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: default_max_total(),
            max_idle: default_max_idle(),
            min_idle: 0,
            borrow_timeout_ms: default_borrow_timeout_ms(),
            block_when_exhausted: default_block_when_exhausted(),
            test_on_borrow: false,
            test_on_return: false,
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_block_when_exhausted(mut self, block: bool) -> Self {
        self.block_when_exhausted = block;
        self
    }

    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_millis(self.borrow_timeout_ms)
    }

    /// `None` when idle expiry is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn validate(&self, group: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPool {
            group: group.to_string(),
            reason,
        };

        if self.max_total == 0 {
            return Err(invalid("max_total must be at least 1".to_string()));
        }
        if self.min_idle > self.max_idle {
            return Err(invalid(format!(
                "min_idle ({}) exceeds max_idle ({})",
                self.min_idle, self.max_idle
            )));
        }
        if self.min_idle > self.max_total {
            return Err(invalid(format!(
                "min_idle ({}) exceeds max_total ({})",
                self.min_idle, self.max_total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate("default").is_ok());
        assert_eq!(config.borrow_timeout(), Duration::from_secs(3));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_rejects_zero_max_total() {
        let err = PoolConfig::default()
            .with_max_total(0)
            .validate("cache")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPool { ref group, .. } if group == "cache"));
    }

    #[test]
    fn test_rejects_min_idle_above_max_idle() {
        let config = PoolConfig::default().with_max_idle(2).with_min_idle(3);
        assert!(config.validate("cache").is_err());
    }

    #[test]
    fn test_deserialize_with_aliases() {
        let config: PoolConfig =
            toml::from_str("max_active = 16\nmax_wait_ms = 250\nmin_idle = 1").unwrap();
        assert_eq!(config.max_total, 16);
        assert_eq!(config.borrow_timeout_ms, 250);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.max_idle, 8);
    }
}
