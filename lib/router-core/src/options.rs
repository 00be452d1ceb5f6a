//! Router options

use crate::query::Strategy;
use crate::registry::{MemoryRegistry, Registry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_ADDRESS: &str = ":9093";
pub const DEFAULT_NETWORK: &str = "micro";
pub const DEFAULT_ADVERTISE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_ADVERT_TTL: Duration = Duration::from_secs(120);

/// Options configure a router
#[derive(Clone)]
pub struct Options {
    /// Router id, stamped on every local route and advert
    pub id: String,
    /// Bind address of the router
    pub address: String,
    /// Network name stamped on local routes
    pub network: String,
    /// Default gateway; adds a catch-all local route on start
    pub gateway: Option<String>,
    /// Which routes get advertised
    pub advertise: Strategy,
    /// Load the registry snapshot into the table on start
    pub precache: bool,
    /// How often accumulated table events are flushed as an advert
    pub advertise_interval: Duration,
    /// TTL carried by published adverts
    pub advert_ttl: Duration,
    /// Discovery service the table is synchronized from
    pub registry: Arc<dyn Registry>,
}

impl Options {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            gateway: None,
            advertise: Strategy::All,
            precache: true,
            advertise_interval: DEFAULT_ADVERTISE_INTERVAL,
            advert_ttl: DEFAULT_ADVERT_TTL,
            registry,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn with_advertise(mut self, strategy: Strategy) -> Self {
        self.advertise = strategy;
        self
    }

    pub fn with_precache(mut self, precache: bool) -> Self {
        self.precache = precache;
        self
    }

    pub fn with_advertise_interval(mut self, interval: Duration) -> Self {
        self.advertise_interval = interval;
        self
    }

    pub fn with_advert_ttl(mut self, ttl: Duration) -> Self {
        self.advert_ttl = ttl;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new(Arc::new(MemoryRegistry::new()))
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("network", &self.network)
            .field("gateway", &self.gateway)
            .field("advertise", &self.advertise)
            .field("precache", &self.precache)
            .field("advertise_interval", &self.advertise_interval)
            .field("advert_ttl", &self.advert_ttl)
            .field("registry", &self.registry.name())
            .finish()
    }
}
