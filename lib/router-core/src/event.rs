//! Table events and the adverts that batch them between routers

use crate::route::Route;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kind of table mutation an event records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event is emitted once per notable table mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: String,
    /// Mutation type
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// When the mutation happened
    pub timestamp: DateTime<Utc>,
    /// Route the mutation applied to
    pub route: Route,
}

impl Event {
    /// Create an event stamped with a fresh id and the current time
    pub fn new(event_type: EventType, route: Route) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            route,
        }
    }

    /// Fill in an id if the event arrived without one
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type, self.route)
    }
}

/// Kind of advert
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertType {
    /// Full table snapshot sent when a consumer starts advertising
    Announce,
    /// Incremental batch of changes sent every tick
    RouteUpdate,
}

impl AdvertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdvertType::Announce => "announce",
            AdvertType::RouteUpdate => "update",
        }
    }
}

impl fmt::Display for AdvertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advert is a batch of route events broadcast by a router
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Advert {
    /// Id of the originating router
    pub id: String,
    #[serde(rename = "type")]
    pub advert_type: AdvertType,
    pub timestamp: DateTime<Utc>,
    /// How long receivers should consider the advert fresh
    pub ttl: Duration,
    pub events: Vec<Event>,
}

impl Advert {
    pub fn new(id: impl Into<String>, advert_type: AdvertType, ttl: Duration, events: Vec<Event>) -> Self {
        Self {
            id: id.into(),
            advert_type,
            timestamp: Utc::now(),
            ttl,
            events,
        }
    }

    /// Encode the advert as JSON for a transport
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an advert received from a transport
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut advert: Advert = serde_json::from_slice(data)?;
        for event in advert.events.iter_mut() {
            event.ensure_id();
        }
        Ok(advert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route {
            service: "svc".to_string(),
            address: "10.0.0.1:8080".to_string(),
            network: "micro".to_string(),
            router: "r1".to_string(),
            link: "local".to_string(),
            metric: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new(EventType::Create, route());
        let b = Event::new(EventType::Create, route());
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_decode_fills_missing_event_ids() {
        let data = br#"{
            "id": "r2",
            "type": "route_update",
            "timestamp": "2024-01-01T00:00:00Z",
            "ttl": {"secs": 120, "nanos": 0},
            "events": [{
                "id": "",
                "type": "delete",
                "timestamp": "2024-01-01T00:00:00Z",
                "route": {
                    "service": "svc",
                    "address": "10.0.0.1:8080",
                    "network": "micro",
                    "router": "r2",
                    "link": "local",
                    "metric": 1
                }
            }]
        }"#;

        let advert = Advert::decode(data).unwrap();
        assert_eq!(advert.advert_type, AdvertType::RouteUpdate);
        assert_eq!(advert.ttl, Duration::from_secs(120));
        assert_eq!(advert.events.len(), 1);
        assert_eq!(advert.events[0].event_type, EventType::Delete);
        assert!(!advert.events[0].id.is_empty());
        assert!(advert.events[0].route.gateway.is_empty());
    }

    #[test]
    fn test_encode_decode_preserves_events() {
        let advert = Advert::new(
            "r1",
            AdvertType::Announce,
            Duration::from_secs(120),
            vec![Event::new(EventType::Create, route())],
        );
        let decoded = Advert::decode(&advert.encode().unwrap()).unwrap();
        assert_eq!(decoded, advert);
    }
}
