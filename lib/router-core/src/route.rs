//! Route entries and their identity hash

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Link value for routes discovered directly by this router
pub const LINK_LOCAL: &str = "local";

/// Value matching any field in queries and watch filters
pub const WILDCARD: &str = "*";

/// Route is a forwarding entry mapping a service to a next-hop address
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination service name
    pub service: String,
    /// Address of the node serving the destination
    pub address: String,
    /// Gateway used to reach the address, empty when directly reachable
    #[serde(default)]
    pub gateway: String,
    /// Network the route belongs to
    pub network: String,
    /// Id of the router that originated the route
    pub router: String,
    /// "local" for routes this router discovered itself
    pub link: String,
    /// Cost of using the route, lower is better
    pub metric: i64,
}

impl Route {
    /// Identity hash over every field except `metric`.
    ///
    /// Two routes that differ only in metric hash the same and are treated
    /// as the same table entry.
    pub fn hash(&self) -> u64 {
        // FNV-1a
        const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
        const FNV_PRIME: u64 = 1099511628211;

        let mut hash = FNV_OFFSET_BASIS;
        for field in [
            &self.service,
            &self.address,
            &self.gateway,
            &self.network,
            &self.router,
            &self.link,
        ] {
            for byte in field.bytes().chain(std::iter::once(0u8)) {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        hash
    }

    /// Reject routes that could never be matched or forwarded
    pub fn validate(&self) -> Result<()> {
        if self.service.is_empty() {
            return Err(CoreError::InvalidRoute("missing service".to_string()));
        }
        if self.address.is_empty() {
            return Err(CoreError::InvalidRoute(format!(
                "missing address for service {}",
                self.service
            )));
        }
        Ok(())
    }

    /// Whether the route was discovered by the router holding it
    pub fn is_local(&self) -> bool {
        self.link == LINK_LOCAL
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} via {} [{}] router={} link={} metric={}",
            self.service,
            self.address,
            if self.gateway.is_empty() { "-" } else { self.gateway.as_str() },
            self.network,
            self.router,
            self.link,
            self.metric
        )
    }
}
