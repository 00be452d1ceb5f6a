//! In-memory routing table

use crate::event::{Event, EventType};
use crate::query::{self, QueryOptions, Strategy};
use crate::route::{Route, WILDCARD};
use crate::watcher::{Delivery, WatchOptions, Watcher, WatcherSink};
use crate::{CoreError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

/// Stored route with its insertion sequence number
#[derive(Clone, Debug)]
struct Entry {
    seq: u64,
    route: Route,
}

/// Table indexes routes by service, then by route hash
pub struct Table {
    routes: RwLock<HashMap<String, HashMap<u64, Entry>>>,
    next_seq: AtomicU64,
    watchers: Mutex<HashMap<String, WatcherSink>>,
}

impl Table {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a new route. Fails with `DuplicateRoute` if the hash exists.
    pub async fn create(&self, route: Route) -> Result<()> {
        route.validate()?;
        let hash = route.hash();
        let mut routes = self.routes.write().await;
        let bucket = routes.entry(route.service.clone()).or_default();

        if bucket.contains_key(&hash) {
            return Err(CoreError::DuplicateRoute);
        }

        debug!("Created route: {}", route);
        bucket.insert(
            hash,
            Entry {
                seq: self.next_seq(),
                route: route.clone(),
            },
        );
        self.send_event(Event::new(EventType::Create, route)).await;
        Ok(())
    }

    /// Insert or overwrite a route.
    ///
    /// Inserting emits an Update event. Overwriting an existing hash (a
    /// metric refresh) is silent and keeps the original sequence number.
    pub async fn update(&self, route: Route) -> Result<()> {
        route.validate()?;
        let hash = route.hash();
        let mut routes = self.routes.write().await;
        let bucket = routes.entry(route.service.clone()).or_default();

        if let Some(entry) = bucket.get_mut(&hash) {
            entry.route = route;
            return Ok(());
        }

        debug!("Updated route: {}", route);
        bucket.insert(
            hash,
            Entry {
                seq: self.next_seq(),
                route: route.clone(),
            },
        );
        self.send_event(Event::new(EventType::Update, route)).await;
        Ok(())
    }

    /// Remove a route. Fails with `RouteNotFound` if it isn't present.
    pub async fn delete(&self, route: Route) -> Result<()> {
        let hash = route.hash();
        let mut routes = self.routes.write().await;

        let bucket = routes.get_mut(&route.service).ok_or(CoreError::RouteNotFound)?;
        let removed = bucket.remove(&hash).ok_or(CoreError::RouteNotFound)?;
        if bucket.is_empty() {
            routes.remove(&route.service);
        }

        debug!("Deleted route: {}", removed.route);
        self.send_event(Event::new(EventType::Delete, removed.route)).await;
        Ok(())
    }

    /// All routes in insertion order
    pub async fn list(&self) -> Result<Vec<Route>> {
        let routes = self.routes.read().await;
        let mut entries: Vec<&Entry> = routes.values().flat_map(|b| b.values()).collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries.into_iter().map(|e| e.route.clone()).collect())
    }

    /// Routes matching the query, filtered through its strategy
    pub async fn query(&self, opts: QueryOptions) -> Result<Vec<Route>> {
        if opts.strategy == Strategy::None {
            return Ok(Vec::new());
        }

        let routes = self.routes.read().await;

        if opts.service != WILDCARD {
            let bucket = routes.get(&opts.service).ok_or(CoreError::RouteNotFound)?;
            return Ok(query::select(
                bucket.values().map(|e| (e.seq, &e.route)),
                &opts,
            ));
        }

        Ok(query::select(
            routes.values().flat_map(|b| b.values()).map(|e| (e.seq, &e.route)),
            &opts,
        ))
    }

    /// Register a watcher for table events
    pub fn watch(&self, opts: WatchOptions) -> Result<Watcher> {
        let (watcher, sink) = Watcher::new(opts);
        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| CoreError::Internal("watcher set poisoned".to_string()))?;
        watchers.insert(watcher.id().to_string(), sink);
        debug!("Registered table watcher {}", watcher.id());
        Ok(watcher)
    }

    /// Number of routes in the table
    pub async fn len(&self) -> usize {
        let routes = self.routes.read().await;
        routes.values().map(|b| b.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of live watchers; stopped ones are unregistered first
    pub fn watcher_count(&self) -> usize {
        match self.watchers.lock() {
            Ok(mut watchers) => {
                watchers.retain(|_, sink| !sink.is_closed());
                watchers.len()
            }
            Err(_) => 0,
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    // Called with the routes write lock held so each watcher sees events in
    // mutation order. A watcher that stays full for the delivery timeout
    // misses the event.
    async fn send_event(&self, event: Event) {
        let sinks: Vec<(String, WatcherSink)> = match self.watchers.lock() {
            Ok(watchers) => watchers
                .iter()
                .map(|(id, sink)| (id.clone(), sink.clone()))
                .collect(),
            Err(_) => return,
        };

        let mut closed = Vec::new();
        for (id, sink) in sinks {
            match sink.deliver(event.clone()).await {
                Delivery::Sent => {}
                Delivery::Dropped => debug!("Watcher {} is full, dropped event {}", id, event.id),
                Delivery::Closed => closed.push(id),
            }
        }

        if closed.is_empty() {
            return;
        }
        if let Ok(mut watchers) = self.watchers.lock() {
            for id in closed {
                debug!("Unregistered stopped watcher {}", id);
                watchers.remove(&id);
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn route(service: &str, address: &str) -> Route {
        Route {
            service: service.to_string(),
            address: address.to_string(),
            gateway: String::new(),
            network: "*".to_string(),
            router: "r1".to_string(),
            link: "local".to_string(),
            metric: 1,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let table = Table::new();
        let r = route("svc", "10.0.0.1:8080");
        table.create(r.clone()).await.unwrap();

        let found = table.query(QueryOptions::new().service("svc")).await.unwrap();
        assert_eq!(found, vec![r]);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let table = Table::new();
        let r = route("svc", "10.0.0.1:8080");
        table.create(r.clone()).await.unwrap();

        let mut same = r.clone();
        same.metric = 10;
        assert!(matches!(table.create(same).await, Err(CoreError::DuplicateRoute)));
        assert_eq!(table.len().await, 1);
        assert_eq!(table.list().await.unwrap()[0].metric, 1);
    }

    #[tokio::test]
    async fn test_create_emits_event() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();
        table.create(route("svc", "10.0.0.1:8080")).await.unwrap();

        let ev = watcher.next().await.unwrap();
        assert_eq!(ev.event_type, EventType::Create);
        assert_eq!(ev.route.address, "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_update_absent_inserts_with_update_event() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();
        table.update(route("svc", "10.0.0.1:8080")).await.unwrap();

        let ev = watcher.next().await.unwrap();
        assert_eq!(ev.event_type, EventType::Update);
        assert_eq!(table.len().await, 1);

        let extra = timeout(Duration::from_millis(100), watcher.next()).await;
        assert!(extra.is_err());
    }

    #[tokio::test]
    async fn test_update_existing_is_silent() {
        let table = Table::new();
        table.create(route("svc", "10.0.0.1:8080")).await.unwrap();

        let mut watcher = table.watch(WatchOptions::default()).unwrap();
        let mut refreshed = route("svc", "10.0.0.1:8080");
        refreshed.metric = 42;
        table.update(refreshed).await.unwrap();

        let ev = timeout(Duration::from_millis(200), watcher.next()).await;
        assert!(ev.is_err(), "overwrite must not emit an event");

        let routes = table.list().await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].metric, 42);
    }

    #[tokio::test]
    async fn test_delete() {
        let table = Table::new();
        let r = route("svc", "10.0.0.1:8080");
        assert!(matches!(table.delete(r.clone()).await, Err(CoreError::RouteNotFound)));

        table.create(r.clone()).await.unwrap();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();
        table.delete(r.clone()).await.unwrap();

        let ev = watcher.next().await.unwrap();
        assert_eq!(ev.event_type, EventType::Delete);
        assert!(table.is_empty().await);
        assert!(matches!(
            table.query(QueryOptions::new().service("svc")).await,
            Err(CoreError::RouteNotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_in_insertion_order() {
        let table = Table::new();
        for i in 0..5 {
            table
                .create(route(&format!("svc-{}", i % 2), &format!("10.0.0.{}:8080", i)))
                .await
                .unwrap();
        }

        let addresses: Vec<String> = table
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(
            addresses,
            vec!["10.0.0.0:8080", "10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.3:8080", "10.0.0.4:8080"]
        );
    }

    #[tokio::test]
    async fn test_query_none_strategy() {
        let table = Table::new();
        table.create(route("svc", "10.0.0.1:8080")).await.unwrap();

        let found = table
            .query(QueryOptions::new().strategy(Strategy::None))
            .await
            .unwrap();
        assert!(found.is_empty());

        // none short-circuits before the service lookup
        let found = table
            .query(QueryOptions::new().service("missing").strategy(Strategy::None))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_query_best_strategy() {
        let table = Table::new();
        for (i, metric) in [7, 3, 5].iter().enumerate() {
            let mut r = route("svc", &format!("10.0.0.{}:8080", i));
            r.metric = *metric;
            table.create(r).await.unwrap();
        }

        let best = table
            .query(QueryOptions::new().service("svc").strategy(Strategy::Best))
            .await
            .unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].metric, 3);
    }

    #[tokio::test]
    async fn test_query_existing_service_without_matches() {
        let table = Table::new();
        table.create(route("svc", "10.0.0.1:8080")).await.unwrap();

        let found = table
            .query(QueryOptions::new().service("svc").router("r2"))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_watch_service_filter() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default().service("bar")).unwrap();

        table.create(route("foo", "10.0.0.1:8080")).await.unwrap();
        table.create(route("bar", "10.0.0.2:8080")).await.unwrap();

        let ev = watcher.next().await.unwrap();
        assert_eq!(ev.route.service, "bar");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_watcher_does_not_block_writes() {
        let table = Table::new();
        let _slow = table.watch(WatchOptions::default()).unwrap();

        for i in 0..50 {
            table.create(route("svc", &format!("10.0.1.{}:8080", i))).await.unwrap();
        }
        assert_eq!(table.len().await, 50);
    }

    #[tokio::test]
    async fn test_burst_reaches_draining_watcher() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 40 {
                seen.push(watcher.next().await.unwrap().route.address);
            }
            seen
        });

        for i in 0..40 {
            table.create(route("svc", &format!("10.0.2.{}:8080", i))).await.unwrap();
        }

        let seen = timeout(Duration::from_secs(5), reader).await.unwrap().unwrap();
        let expected: Vec<String> = (0..40).map(|i| format!("10.0.2.{}:8080", i)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_invalid_route_rejected() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();

        assert!(matches!(
            table.create(route("svc", "")).await,
            Err(CoreError::InvalidRoute(_))
        ));
        assert!(matches!(
            table.update(route("", "10.0.0.1:8080")).await,
            Err(CoreError::InvalidRoute(_))
        ));
        assert!(table.is_empty().await);

        let ev = timeout(Duration::from_millis(100), watcher.next()).await;
        assert!(ev.is_err());
    }

    #[tokio::test]
    async fn test_stopped_watcher_is_removed() {
        let table = Table::new();
        let mut watcher = table.watch(WatchOptions::default()).unwrap();
        let _other = table.watch(WatchOptions::default()).unwrap();
        assert_eq!(table.watcher_count(), 2);

        watcher.stop();
        table.create(route("svc", "10.0.0.1:8080")).await.unwrap();
        assert_eq!(table.watcher_count(), 1);
        assert!(matches!(watcher.next().await, Err(CoreError::WatcherStopped)));
    }
}
