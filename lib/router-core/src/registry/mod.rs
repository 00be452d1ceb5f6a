//! Service discovery boundary consumed by the router

pub mod memory;

pub use memory::MemoryRegistry;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A single instance of a service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A discovered service and its nodes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Service {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            nodes,
        }
    }
}

/// Change reported by a registry watch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for RegistryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryAction::Create => f.write_str("create"),
            RegistryAction::Update => f.write_str("update"),
            RegistryAction::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEvent {
    pub action: RegistryAction,
    pub service: Service,
}

/// Discovery service the router synchronizes its table from
#[async_trait]
pub trait Registry: Send + Sync {
    /// Registry implementation name for logging
    fn name(&self) -> &'static str;

    /// Services known to the registry; nodes may be omitted
    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Every registered version of a service, with nodes
    async fn get_service(&self, name: &str) -> Result<Vec<Service>>;

    /// Open a stream of service changes
    async fn watch(&self) -> Result<Box<dyn RegistryWatcher>>;
}

#[async_trait]
pub trait RegistryWatcher: Send {
    /// Block until the next change
    async fn next(&mut self) -> Result<RegistryEvent>;

    fn stop(&mut self);
}

/// Registry backends selectable from configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryConfig {
    /// In-process registry, optionally seeded with static services
    Memory {
        #[serde(default)]
        services: Vec<Service>,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::Memory {
            services: Vec::new(),
        }
    }
}

/// Build the configured registry backend
pub async fn build_registry(config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
    match config {
        RegistryConfig::Memory { services } => {
            let registry = MemoryRegistry::new();
            for service in services {
                registry.register(service.clone()).await?;
            }
            Ok(Arc::new(registry))
        }
    }
}
