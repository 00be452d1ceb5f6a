//! File and environment configuration for a router process

use crate::options::{self, Options};
use crate::query::Strategy;
use crate::registry::{Registry, RegistryConfig};
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Router process configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub id: String,
    pub address: String,
    pub network: String,
    pub gateway: Option<String>,
    pub advertise: Strategy,
    pub precache: bool,
    pub advertise_interval_secs: u64,
    pub advert_ttl_secs: u64,
    /// Bind address for /metrics, /healthz and /routes; disabled when unset
    pub metrics_address: Option<String>,
    pub log_format: LogFormat,
    pub registry: RegistryConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address: options::DEFAULT_ADDRESS.to_string(),
            network: options::DEFAULT_NETWORK.to_string(),
            gateway: None,
            advertise: Strategy::All,
            precache: true,
            advertise_interval_secs: options::DEFAULT_ADVERTISE_INTERVAL.as_secs(),
            advert_ttl_secs: options::DEFAULT_ADVERT_TTL.as_secs(),
            metrics_address: None,
            log_format: LogFormat::Text,
            registry: RegistryConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RouterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, or defaults when no path is given, then apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `ROUTER_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("ROUTER_ID") {
            self.id = id;
        }
        if let Some(address) = lookup("ROUTER_ADDRESS") {
            self.address = address;
        }
        if let Some(network) = lookup("ROUTER_NETWORK") {
            self.network = network;
        }
        if let Some(gateway) = lookup("ROUTER_GATEWAY") {
            self.gateway = Some(gateway).filter(|g| !g.is_empty());
        }
        if let Some(strategy) = lookup("ROUTER_ADVERTISE") {
            self.advertise = strategy.parse()?;
        }
        if let Some(address) = lookup("ROUTER_METRICS_ADDRESS") {
            self.metrics_address = Some(address).filter(|a| !a.is_empty());
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidConfiguration("router id is empty".to_string()));
        }
        if self.network.is_empty() {
            return Err(CoreError::InvalidConfiguration("network is empty".to_string()));
        }
        if self.advertise_interval_secs == 0 {
            return Err(CoreError::InvalidConfiguration(
                "advertise_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Router options backed by the given registry
    pub fn into_options(self, registry: Arc<dyn Registry>) -> Options {
        let mut options = Options::new(registry)
            .with_id(self.id)
            .with_address(self.address)
            .with_network(self.network)
            .with_advertise(self.advertise)
            .with_precache(self.precache)
            .with_advertise_interval(Duration::from_secs(self.advertise_interval_secs))
            .with_advert_ttl(Duration::from_secs(self.advert_ttl_secs));
        options.gateway = self.gateway;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert!(!config.id.is_empty());
        assert_eq!(config.network, "micro");
        assert_eq!(config.advertise, Strategy::All);
        assert_eq!(config.advertise_interval_secs, 10);
        assert!(config.precache);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
id: router-a
network: edge
gateway: 10.0.0.254:8080
advertise: best
advert_ttl_secs: 60
log_format: json
registry:
  kind: memory
  services:
    - name: greeter
      nodes:
        - id: g1
          address: 10.0.0.1:8080
"#;
        let config = RouterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.id, "router-a");
        assert_eq!(config.network, "edge");
        assert_eq!(config.gateway.as_deref(), Some("10.0.0.254:8080"));
        assert_eq!(config.advertise, Strategy::Best);
        assert_eq!(config.advert_ttl_secs, 60);
        assert_eq!(config.advertise_interval_secs, 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(RouterConfig::from_yaml("advertise: fastest").is_err());
        assert!(RouterConfig::from_yaml("advertise_interval_secs: 0").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROUTER_ID", "router-b"),
            ("ROUTER_ADVERTISE", "local"),
            ("ROUTER_GATEWAY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = RouterConfig {
            gateway: Some("10.0.0.254:8080".to_string()),
            ..Default::default()
        };
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.id, "router-b");
        assert_eq!(config.advertise, Strategy::Local);
        assert_eq!(config.gateway, None);
    }

    #[test]
    fn test_bad_strategy_override() {
        let mut config = RouterConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "ROUTER_ADVERTISE").then(|| "fastest".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_into_options() {
        let config = RouterConfig {
            id: "router-c".to_string(),
            advertise_interval_secs: 3,
            ..Default::default()
        };
        let options = config.into_options(Arc::new(MemoryRegistry::new()));
        assert_eq!(options.id, "router-c");
        assert_eq!(options.advertise_interval, Duration::from_secs(3));
        assert_eq!(options.registry.name(), "memory");
    }
}
