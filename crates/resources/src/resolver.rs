//! DNS resolver resources.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::types::{ResourceKey, ResourceSpec};

/// Namespace holding layered configuration inputs.
pub const CONFIG_NAMESPACE: &str = "config";

/// Namespace holding merged, operational resources.
pub const OPERATIONAL_NAMESPACE: &str = "operational";

/// Type tag of resolver specs in both namespaces.
pub const RESOLVER_SPEC_TYPE: &str = "ResolverSpec";

/// Id of the single merged resolver spec.
pub const RESOLVER_ID: &str = "resolvers";

/// Precedence of a configuration source, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigLayer {
    #[default]
    Default,
    Cmdline,
    Platform,
    Operator,
    Configuration,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Cmdline => write!(f, "cmdline"),
            Self::Platform => write!(f, "platform"),
            Self::Operator => write!(f, "operator"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Resolver configuration: search domains and nameserver addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSpec {
    #[serde(default)]
    pub config_layer: ConfigLayer,
    #[serde(default)]
    pub search_domains: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
}

impl ResolverSpec {
    /// Create an empty spec on the given layer.
    pub fn new(config_layer: ConfigLayer) -> Self {
        Self {
            config_layer,
            ..Self::default()
        }
    }

    /// Set the search domains.
    #[must_use]
    pub fn with_search_domains<I, T>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.search_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Set the DNS servers.
    #[must_use]
    pub fn with_dns_servers(mut self, servers: impl IntoIterator<Item = IpAddr>) -> Self {
        self.dns_servers = servers.into_iter().collect();
        self
    }
}

impl ResourceSpec for ResolverSpec {
    const RESOURCE_TYPE: &'static str = RESOLVER_SPEC_TYPE;
}

/// Key of a layered input spec.
pub fn layered_resolver_key(id: impl Into<String>) -> ResourceKey {
    ResourceKey::new(CONFIG_NAMESPACE, RESOLVER_SPEC_TYPE, id)
}

/// Key of the merged output spec.
pub fn merged_resolver_key() -> ResourceKey {
    ResourceKey::new(OPERATIONAL_NAMESPACE, RESOLVER_SPEC_TYPE, RESOLVER_ID)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_are_ordered() {
        let mut layers = vec![
            ConfigLayer::Configuration,
            ConfigLayer::Default,
            ConfigLayer::Operator,
            ConfigLayer::Platform,
            ConfigLayer::Cmdline,
        ];
        layers.sort();
        assert_eq!(
            layers,
            vec![
                ConfigLayer::Default,
                ConfigLayer::Cmdline,
                ConfigLayer::Platform,
                ConfigLayer::Operator,
                ConfigLayer::Configuration,
            ]
        );
    }

    #[test]
    fn test_spec_json_shape() {
        let spec = ResolverSpec::new(ConfigLayer::Platform)
            .with_search_domains(["example.org"])
            .with_dns_servers(["1.1.1.1".parse().unwrap()]);
        let value = spec.encode().unwrap();
        assert_eq!(value["config_layer"], "platform");
        assert_eq!(value["dns_servers"][0], "1.1.1.1");
        assert_eq!(ResolverSpec::decode(&value).unwrap(), spec);
    }

    #[test]
    fn test_keys() {
        assert_eq!(
            merged_resolver_key().to_string(),
            "operational/ResolverSpec/resolvers"
        );
        assert_eq!(layered_resolver_key("dhcp").namespace, CONFIG_NAMESPACE);
    }
}
