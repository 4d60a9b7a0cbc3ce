//! Daemon configuration loaded from TOML.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result, bail};
use netresolv_reconciler::SupervisorConfig;
use netresolv_resources::{
    ConfigLayer, DEFAULT_EVENT_CAPACITY, ResolverSpec, ResourceSpec, ResourceStore,
    layered_resolver_key,
};
use serde::Deserialize;
use tracing::debug;

/// Environment variable overriding `supervisor.max_restarts`.
pub const MAX_RESTARTS_ENV: &str = "NETRESOLV_MAX_RESTARTS";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub supervisor: SupervisorConfig,
    pub store: StoreConfig,
    pub layers: Vec<LayerConfig>,
}

/// Resource store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the change broadcast buffer.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// One resolver configuration source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayerConfig {
    /// Resource id within the config namespace.
    pub id: String,
    pub layer: ConfigLayer,
    #[serde(default)]
    pub search_domains: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
}

impl LayerConfig {
    /// Resolver spec published for this source.
    pub fn to_spec(&self) -> ResolverSpec {
        ResolverSpec::new(self.layer)
            .with_search_domains(self.search_domains.iter().cloned())
            .with_dns_servers(self.dns_servers.iter().copied())
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults with environment overrides.
    ///
    /// # Errors
    ///
    /// See [`DaemonConfig::load_from_file`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let config = Self::default().with_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an override can't be parsed.
    pub fn with_env_overrides(self) -> Result<Self> {
        match std::env::var(MAX_RESTARTS_ENV) {
            Ok(value) => self.with_max_restarts_override(&value),
            Err(_) => Ok(self),
        }
    }

    fn with_max_restarts_override(mut self, value: &str) -> Result<Self> {
        let max_restarts = value
            .trim()
            .parse::<u32>()
            .with_context(|| format!("Invalid {MAX_RESTARTS_ENV} value '{value}'"))?;
        self.supervisor.max_restarts = Some(max_restarts);
        Ok(self)
    }

    /// Check the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid backoff settings, a zero event capacity or
    /// duplicate layer ids.
    pub fn validate(&self) -> Result<()> {
        self.supervisor
            .validate()
            .context("Invalid [supervisor] section")?;

        if self.store.event_capacity == 0 {
            bail!("store.event_capacity must be positive");
        }

        let mut seen = BTreeSet::new();
        if let Some(duplicate) = self.layers.iter().find(|l| !seen.insert(l.id.as_str())) {
            bail!("duplicate layer id '{}'", duplicate.id);
        }
        Ok(())
    }
}

/// Publish every configured layer into the config namespace.
///
/// # Errors
///
/// Returns an error if a spec can't be encoded or created.
pub async fn seed_layers(store: &dyn ResourceStore, layers: &[LayerConfig]) -> Result<()> {
    for layer in layers {
        let key = layered_resolver_key(layer.id.as_str());
        let body = layer.to_spec().encode()?;
        store
            .create(&key, None, body)
            .await
            .with_context(|| format!("Failed to seed layer '{}'", layer.id))?;
        debug!(key = %key, layer = %layer.layer, "Seeded resolver layer");
    }
    Ok(())
}
