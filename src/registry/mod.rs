//! Group name → provider registry
//!
//! Startup is two-phase: every group is registered, then `signal_ready` is
//! called. The first lookup after that builds the provider table exactly once
//! (freezing registrations, picking the default, warming pools); later
//! lookups read the memoised table without locking.

pub mod bootstrap;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{GroupConfig, GroupSettings, TopologyKind, DEFAULT_GROUP_NAME};
use crate::provider::{Backend, Lease, Provider, TopologyBackend};
use crate::utils::{ConfigError, ProviderError};

pub use bootstrap::BootstrapGate;

/// Frozen provider table
pub struct Providers<B: TopologyBackend = Backend> {
    by_name: HashMap<String, Arc<Provider<B>>>,
    /// Registration order
    names: Vec<String>,
    default: Arc<Provider<B>>,
}

impl<B: TopologyBackend> Providers<B> {
    pub fn get(&self, name: &str) -> Option<&Arc<Provider<B>>> {
        self.by_name.get(name)
    }

    pub fn default_provider(&self) -> &Arc<Provider<B>> {
        &self.default
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

struct Registrations<B: TopologyBackend> {
    providers: Vec<Arc<Provider<B>>>,
    /// Set by `signal_ready`; no registrations afterwards
    closed: bool,
}

pub struct ProviderRegistry<B: TopologyBackend = Backend> {
    pending: Mutex<Registrations<B>>,
    gate: BootstrapGate<Providers<B>>,
}

static GLOBAL: OnceLock<ProviderRegistry> = OnceLock::new();

impl ProviderRegistry {
    /// Process-wide registry
    pub fn global() -> &'static ProviderRegistry {
        GLOBAL.get_or_init(ProviderRegistry::new)
    }
}

impl<B: TopologyBackend> ProviderRegistry<B> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Registrations {
                providers: Vec::new(),
                closed: false,
            }),
            gate: BootstrapGate::new(),
        }
    }

    /// Register a validated group
    ///
    /// The provider is constructed immediately but opens no connections.
    pub fn register(&self, config: GroupConfig) -> Result<Arc<Provider<B>>, ConfigError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(ConfigError::RegistrationClosed(config.name().to_string()));
        }
        if pending
            .providers
            .iter()
            .any(|p| p.group_name() == config.name())
        {
            return Err(ConfigError::DuplicateGroup(config.name().to_string()));
        }

        let endpoints = config.endpoints().len();
        let provider = Arc::new(Provider::new(config)?);
        info!(
            group = %provider.group_name(),
            kind = %provider.topology_kind(),
            endpoints,
            "Registered group"
        );
        pending.providers.push(Arc::clone(&provider));
        Ok(provider)
    }

    /// Validate raw settings and register them
    pub fn register_settings(&self, settings: GroupSettings) -> Result<Arc<Provider<B>>, ConfigError> {
        self.register(settings.validate()?)
    }

    /// Close registration and release blocked resolvers
    pub fn signal_ready(&self) {
        let registered = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.providers.len()
        };
        if self.gate.signal_ready() {
            info!(groups = registered, "Registry ready");
        }
    }

    /// Same as `signal_ready`
    pub fn finalize_and_ready(&self) {
        self.signal_ready();
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// The provider table, blocking until ready and building it on first use
    pub fn providers(&self) -> Result<Arc<Providers<B>>, ConfigError> {
        self.gate.get_or_build(|| self.build())
    }

    /// Provider for `name`
    ///
    /// A blank name selects the default. An unknown name also falls back to
    /// the default, with a warning.
    pub fn resolve(&self, name: &str) -> Result<Arc<Provider<B>>, ConfigError> {
        let providers = self.providers()?;
        Ok(Self::select(&providers, name))
    }

    /// Like `resolve` but fails with `NotReady` instead of blocking
    pub fn try_resolve(&self, name: &str) -> Result<Arc<Provider<B>>, ConfigError> {
        let providers = self.gate.try_get_or_build(|| self.build())?;
        Ok(Self::select(&providers, name))
    }

    pub fn default_provider(&self) -> Result<Arc<Provider<B>>, ConfigError> {
        Ok(Arc::clone(self.providers()?.default_provider()))
    }

    pub fn current_topology_kind(&self, name: &str) -> Result<TopologyKind, ConfigError> {
        Ok(self.resolve(name)?.topology_kind())
    }

    pub fn is_cluster(&self, name: &str) -> Result<bool, ConfigError> {
        Ok(self.current_topology_kind(name)? == TopologyKind::Cluster)
    }

    pub fn is_standalone(&self, name: &str) -> Result<bool, ConfigError> {
        Ok(self.current_topology_kind(name)? == TopologyKind::Standalone)
    }

    pub fn is_sharded(&self, name: &str) -> Result<bool, ConfigError> {
        Ok(self.current_topology_kind(name)? == TopologyKind::Sharded)
    }

    /// Lease from the named group's provider
    pub fn lease(&self, name: &str) -> Result<Lease<B::Connection>, ProviderError> {
        Ok(self.resolve(name)?.lease()?)
    }

    /// Release the calling thread's lease on the named group
    pub fn release(&self, name: &str) -> Result<(), ProviderError> {
        self.resolve(name)?.release();
        Ok(())
    }

    /// Registered group names in registration order
    pub fn group_names(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.providers()?.names().to_vec())
    }

    /// Times the provider table has been built (0 or 1)
    pub fn build_count(&self) -> usize {
        self.gate.build_count()
    }

    /// Shut down every registered provider
    pub fn shutdown(&self) {
        let providers: Vec<Arc<Provider<B>>> = self.pending.lock().providers.clone();
        for provider in &providers {
            provider.shutdown();
        }
        info!(groups = providers.len(), "Registry shut down");
    }

    fn select(providers: &Providers<B>, name: &str) -> Arc<Provider<B>> {
        let name = name.trim();
        if name.is_empty() {
            return Arc::clone(providers.default_provider());
        }
        match providers.get(name) {
            Some(provider) => Arc::clone(provider),
            None => {
                warn!(
                    group = %name,
                    default = %providers.default_provider().group_name(),
                    "Unknown group, falling back to default provider"
                );
                Arc::clone(providers.default_provider())
            }
        }
    }

    fn build(&self) -> Result<Providers<B>, ConfigError> {
        let registered: Vec<Arc<Provider<B>>> = self.pending.lock().providers.clone();

        let default = registered
            .iter()
            .find(|p| p.group_name() == DEFAULT_GROUP_NAME)
            .or_else(|| match registered.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .cloned()
            .ok_or(ConfigError::NoDefaultProvider {
                registered: registered.len(),
            })?;

        for provider in &registered {
            match provider.warm_up() {
                Ok(0) => {}
                Ok(opened) => debug!(group = %provider.group_name(), opened, "Warmed up pool"),
                Err(e) => warn!(group = %provider.group_name(), error = %e, "Pool warm-up failed"),
            }
        }

        info!(
            groups = registered.len(),
            default = %default.group_name(),
            "Provider registry built"
        );

        Ok(Providers {
            by_name: registered
                .iter()
                .map(|p| (p.group_name().to_string(), Arc::clone(p)))
                .collect(),
            names: registered.iter().map(|p| p.group_name().to_string()).collect(),
            default,
        })
    }
}

impl<B: TopologyBackend> Default for ProviderRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::testing::{LogCapture, MockManager};
    use crate::utils::LeaseError;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn group(name: &str, mode: &str, servers: &[&str]) -> GroupConfig {
        GroupConfig::new(name, mode, servers).unwrap()
    }

    fn mock_registry() -> ProviderRegistry<MockManager> {
        ProviderRegistry::new()
    }

    #[test]
    fn test_resolve_matches_configured_kind() {
        let registry: ProviderRegistry = ProviderRegistry::new();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry
            .register(group("shards", "sharded", &["10.0.0.1:6379", "10.0.0.2:6379"]))
            .unwrap();
        registry
            .register(group("cache2", "cluster", &["10.0.0.1:7000", "10.0.0.2:7000"]))
            .unwrap();
        registry.signal_ready();

        assert_eq!(registry.current_topology_kind("default").unwrap(), TopologyKind::Standalone);
        assert_eq!(registry.current_topology_kind("shards").unwrap(), TopologyKind::Sharded);
        assert_eq!(registry.current_topology_kind("cache2").unwrap(), TopologyKind::Cluster);
        assert!(registry.is_sharded("shards").unwrap());
        assert!(!registry.is_cluster("default").unwrap());
    }

    #[test]
    fn test_duplicate_group_is_rejected() {
        let registry = mock_registry();
        registry
            .register(group("orders", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        let err = registry
            .register(group("orders", "cluster", &["10.0.0.1:7000"]))
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::DuplicateGroup("orders".to_string()));
    }

    #[test]
    fn test_registration_after_ready_is_rejected() {
        let registry = mock_registry();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry.signal_ready();

        let err = registry
            .register(group("late", "standalone", &["127.0.0.1:6380"]))
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::RegistrationClosed("late".to_string()));
    }

    #[test]
    fn test_invalid_settings_are_rejected_at_registration() {
        let registry = mock_registry();
        let err = registry
            .register_settings(GroupSettings::new(
                "standalone",
                &["10.0.0.1:6379", "10.0.0.2:6379"],
            ))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidTopology { .. }));
    }

    #[test]
    fn test_no_default_with_several_groups_fails() {
        let registry = mock_registry();
        registry
            .register(group("a", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry
            .register(group("b", "standalone", &["127.0.0.1:6380"]))
            .unwrap();
        registry.signal_ready();

        let expected = ConfigError::NoDefaultProvider { registered: 2 };
        assert_eq!(registry.resolve("a").err(), Some(expected.clone()));
        // Memoised, never rebuilt
        assert_eq!(registry.resolve("b").err(), Some(expected));
        assert_eq!(registry.build_count(), 1);
    }

    #[test]
    fn test_no_groups_fails() {
        let registry = mock_registry();
        registry.signal_ready();
        assert_eq!(
            registry.resolve("").err(),
            Some(ConfigError::NoDefaultProvider { registered: 0 })
        );
    }

    #[test]
    fn test_single_group_becomes_default() {
        let registry = mock_registry();
        let only = registry
            .register(group("sessions", "cluster", &["10.0.0.1:7000"]))
            .unwrap();
        registry.signal_ready();

        let default = registry.default_provider().unwrap();
        assert!(Arc::ptr_eq(&default, &only));
        assert!(Arc::ptr_eq(&registry.resolve("").unwrap(), &only));
    }

    #[test]
    fn test_unknown_group_falls_back_to_default() {
        let registry: ProviderRegistry = ProviderRegistry::new();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry.signal_ready();

        let default = registry.resolve("default").unwrap();
        assert_eq!(default.topology_kind(), TopologyKind::Standalone);

        let logs = LogCapture::default();
        let missing = logs.run(|| registry.resolve("missingGroup").unwrap());
        assert!(Arc::ptr_eq(&default, &missing));

        let output = logs.contents();
        assert!(output.contains("WARN"), "{}", output);
        assert!(output.contains("Unknown group, falling back to default provider"));
        assert!(output.contains("group=missingGroup"));
        assert!(output.contains("default=default"));
    }

    #[test]
    fn test_cluster_group_resolves_to_same_instance() {
        let registry: ProviderRegistry = ProviderRegistry::new();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry
            .register(group("cache2", "cluster", &["10.0.0.1:7000", "10.0.0.2:7000"]))
            .unwrap();
        registry.finalize_and_ready();

        let first = registry.resolve("cache2").unwrap();
        let second = registry.resolve("cache2").unwrap();
        assert_eq!(first.topology_kind(), TopologyKind::Cluster);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.group_names().unwrap(), vec!["default", "cache2"]);
    }

    #[test]
    fn test_try_resolve_before_ready() {
        let registry = mock_registry();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        assert_eq!(registry.try_resolve("default").err(), Some(ConfigError::NotReady));
        assert_eq!(registry.build_count(), 0);

        registry.signal_ready();
        assert!(registry.try_resolve("default").is_ok());
    }

    #[test]
    fn test_concurrent_resolve_builds_once() {
        const THREADS: usize = 12;
        let registry = Arc::new(mock_registry());
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry
            .register(group("cache2", "cluster", &["10.0.0.1:7000"]))
            .unwrap();

        let start = Arc::new(Barrier::new(THREADS + 1));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    let name = if i % 2 == 0 { "default" } else { "cache2" };
                    registry.resolve(name).unwrap()
                })
            })
            .collect();

        start.wait();
        thread::sleep(Duration::from_millis(20));
        registry.signal_ready();

        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.build_count(), 1);

        let default = registry.resolve("default").unwrap();
        let cache2 = registry.resolve("cache2").unwrap();
        for (i, provider) in resolved.iter().enumerate() {
            let expected = if i % 2 == 0 { &default } else { &cache2 };
            assert!(Arc::ptr_eq(provider, expected));
        }
    }

    #[test]
    fn test_bootstrap_warms_pools() {
        let registry = mock_registry();
        let pool = PoolConfig::default().with_min_idle(2);
        let provider = registry
            .register_settings(
                GroupSettings::new("standalone", &["127.0.0.1:6379"]).pool(pool),
            )
            .unwrap();
        assert_eq!(provider.pool_stats().idle, 0);

        registry.signal_ready();
        registry.resolve("default").unwrap();
        assert_eq!(provider.pool_stats().idle, 2);
    }

    #[test]
    fn test_lease_and_release_through_registry() {
        let registry = mock_registry();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry.signal_ready();

        let first = registry.lease("default").unwrap();
        let second = registry.lease("").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        registry.release("default").unwrap();
        assert!(first.is_released());
        // Releasing again is a no-op
        registry.release("default").unwrap();
    }

    #[test]
    fn test_shutdown_closes_every_provider() {
        let registry = mock_registry();
        registry
            .register(group("default", "standalone", &["127.0.0.1:6379"]))
            .unwrap();
        registry
            .register(group("other", "sharded", &["10.0.0.1:6379"]))
            .unwrap();
        registry.signal_ready();

        registry.shutdown();
        for name in ["default", "other"] {
            let provider = registry.resolve(name).unwrap();
            assert!(provider.is_shut_down());
        }
        assert!(matches!(
            registry.lease("other"),
            Err(ProviderError::Lease(LeaseError::Shutdown { .. }))
        ));
    }
}
