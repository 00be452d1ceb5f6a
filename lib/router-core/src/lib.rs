//! Routing control plane
//!
//! This library provides:
//! - Routing table indexed by service and route hash, with watchers
//! - Query engine with wildcard matching and selection strategies
//! - Router that syncs the table from a service registry and gossips
//!   flap-suppressed adverts with peer routers

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod options;
pub mod query;
pub mod registry;
pub mod route;
pub mod router;
pub mod table;
pub mod watcher;

pub use config::{LogFormat, RouterConfig};
pub use error::{CoreError, Result};
pub use event::{Advert, AdvertType, Event, EventType};
pub use metrics::RouterMetrics;
pub use options::Options;
pub use query::{QueryOptions, Strategy};
pub use registry::{MemoryRegistry, Node, Registry, RegistryAction, RegistryConfig, Service};
pub use route::Route;
pub use router::{Router, Status};
pub use table::Table;
pub use watcher::{WatchOptions, Watcher};
