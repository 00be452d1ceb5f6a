//! Prometheus metrics for the routing control plane

use crate::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics for one router instance, registered in a registry of its own
#[derive(Clone)]
pub struct RouterMetrics {
    /// Routes currently in the table
    pub routes: IntGauge,
    /// Adverts published to subscribers, by advert type
    pub adverts_total: IntCounterVec,
    /// Adverts lost because a subscriber channel was full
    pub advert_drops_total: IntCounter,
    /// Table events kept out of adverts, by reason
    pub events_suppressed_total: IntCounterVec,
    /// Peer advert events handled by process, by outcome
    pub process_events_total: IntCounterVec,
    /// Watch reconnects after errors, by source
    pub watch_restarts_total: IntCounterVec,
    pub registry: Arc<Registry>,
}

impl RouterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let routes = IntGauge::new("router_routes", "Routes in the routing table")?;

        let adverts_total = IntCounterVec::new(
            Opts::new("router_adverts_total", "Adverts published to subscribers"),
            &["type"],
        )?;

        let advert_drops_total = IntCounter::new(
            "router_advert_drops_total",
            "Adverts dropped because a subscriber was not keeping up",
        )?;

        let events_suppressed_total = IntCounterVec::new(
            Opts::new(
                "router_events_suppressed_total",
                "Table events not advertised",
            ),
            &["reason"],
        )?;

        let process_events_total = IntCounterVec::new(
            Opts::new(
                "router_process_events_total",
                "Peer advert events processed",
            ),
            &["outcome"],
        )?;

        let watch_restarts_total = IntCounterVec::new(
            Opts::new(
                "router_watch_restarts_total",
                "Watch loops restarted after an error",
            ),
            &["source"],
        )?;

        registry.register(Box::new(routes.clone()))?;
        registry.register(Box::new(adverts_total.clone()))?;
        registry.register(Box::new(advert_drops_total.clone()))?;
        registry.register(Box::new(events_suppressed_total.clone()))?;
        registry.register(Box::new(process_events_total.clone()))?;
        registry.register(Box::new(watch_restarts_total.clone()))?;

        Ok(Self {
            routes,
            adverts_total,
            advert_drops_total,
            events_suppressed_total,
            process_events_total,
            watch_restarts_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::CoreError::Internal(e.to_string()))
    }
}
