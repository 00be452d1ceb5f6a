//! Route matching and selection strategies

use crate::route::{Route, LINK_LOCAL, WILDCARD};
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Route selection policy applied when several routes serve one destination
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Every matching route
    #[default]
    #[serde(alias = "advertise_all")]
    All,
    /// Lowest metric route per service and network
    #[serde(alias = "advertise_best")]
    Best,
    /// Only routes discovered by this router
    #[serde(alias = "advertise_local")]
    Local,
    /// Nothing
    #[serde(alias = "advertise_none")]
    None,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::All => "all",
            Strategy::Best => "best",
            Strategy::Local => "local",
            Strategy::None => "none",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Strategy::All),
            "best" => Ok(Strategy::Best),
            "local" => Ok(Strategy::Local),
            "none" => Ok(Strategy::None),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown advertise strategy: {}",
                other
            ))),
        }
    }
}

/// Query filters. Every field defaults to the `"*"` wildcard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    pub service: String,
    pub address: String,
    pub gateway: String,
    pub network: String,
    pub router: String,
    pub link: String,
    pub strategy: Strategy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            service: WILDCARD.to_string(),
            address: WILDCARD.to_string(),
            gateway: WILDCARD.to_string(),
            network: WILDCARD.to_string(),
            router: WILDCARD.to_string(),
            link: WILDCARD.to_string(),
            strategy: Strategy::All,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = gateway.into();
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn router(mut self, router: impl Into<String>) -> Self {
        self.router = router.into();
        self
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Whether a route passes the field filters.
    ///
    /// The service is not compared here; the table selects the service
    /// bucket before matching. `Strategy::Local` forces the link filter to
    /// "local" whatever the caller asked for.
    pub fn matches(&self, route: &Route) -> bool {
        let link = match self.strategy {
            Strategy::Local => LINK_LOCAL,
            _ => self.link.as_str(),
        };

        field_matches(&self.gateway, &route.gateway)
            && field_matches(&self.network, &route.network)
            && field_matches(&self.router, &route.router)
            && field_matches(&self.address, &route.address)
            && field_matches(link, &route.link)
    }
}

fn field_matches(want: &str, have: &str) -> bool {
    want == WILDCARD || want == have
}

/// Filter candidates and apply the selection strategy.
///
/// Candidates carry their table sequence number; results come back in
/// sequence order. Under `Strategy::Best` one route survives per
/// `service@network` group: lowest metric, then smallest address, then
/// lowest sequence number.
pub fn select<'a, I>(candidates: I, opts: &QueryOptions) -> Vec<Route>
where
    I: IntoIterator<Item = (u64, &'a Route)>,
{
    if opts.strategy == Strategy::None {
        return Vec::new();
    }

    let mut matched: Vec<(u64, &Route)> = candidates
        .into_iter()
        .filter(|(_, route)| opts.matches(route))
        .collect();
    matched.sort_by_key(|(seq, _)| *seq);

    if opts.strategy != Strategy::Best {
        return matched.into_iter().map(|(_, route)| route.clone()).collect();
    }

    let mut best: HashMap<String, (u64, &Route)> = HashMap::new();
    for (seq, route) in matched {
        let key = format!("{}@{}", route.service, route.network);
        match best.get(&key) {
            Some((_, current)) if !is_better(route, current) => {}
            _ => {
                best.insert(key, (seq, route));
            }
        }
    }

    let mut winners: Vec<(u64, &Route)> = best.into_values().collect();
    winners.sort_by_key(|(seq, _)| *seq);
    winners.into_iter().map(|(_, route)| route.clone()).collect()
}

// Candidates arrive in sequence order, so an equal metric and address keeps
// the earlier entry.
fn is_better(candidate: &Route, current: &Route) -> bool {
    (candidate.metric, candidate.address.as_str()) < (current.metric, current.address.as_str())
}
