//! Router control plane
//!
//! A router keeps its table in sync with the registry, turns table
//! mutations into periodic flap-suppressed adverts for its subscribers,
//! and applies adverts received from peer routers.

use crate::event::{Advert, AdvertType, Event, EventType};
use crate::metrics::RouterMetrics;
use crate::options::Options;
use crate::query::{QueryOptions, Strategy};
use crate::registry::{RegistryAction, RegistryWatcher, Service};
use crate::route::{Route, LINK_LOCAL, WILDCARD};
use crate::table::Table;
use crate::watcher::{WatchOptions, Watcher};
use crate::{CoreError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the channel feeding table events into the advertise loop
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Capacity of each subscriber's advert channel
pub const ADVERT_CHANNEL_CAPACITY: usize = 128;

/// Delay before a failed watch is reopened
const WATCH_RETRY: Duration = Duration::from_secs(1);

/// Router lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Running,
    Advertising,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Stopped => f.write_str("stopped"),
            Status::Running => f.write_str("running"),
            Status::Advertising => f.write_str("advertising"),
        }
    }
}

/// Router is a cheaply cloneable handle; clones share one control plane
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

struct Inner {
    options: RwLock<Options>,
    table: Arc<Table>,
    metrics: RouterMetrics,
    state: tokio::sync::Mutex<State>,
    // kept apart from the table lock so advert fan-out never waits on route writes
    subscribers: Mutex<HashMap<String, mpsc::Sender<Arc<Advert>>>>,
}

#[derive(Default)]
struct State {
    running: bool,
    exit: Option<watch::Sender<bool>>,
    // set while the advertise loop runs
    events: Option<mpsc::Sender<Event>>,
}

impl Router {
    pub fn new(options: Options) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                options: RwLock::new(options),
                table: Arc::new(Table::new()),
                metrics: RouterMetrics::new()?,
                state: tokio::sync::Mutex::new(State::default()),
                subscribers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Replace the router options
    pub fn init(&self, options: Options) -> Result<()> {
        let mut current = self
            .inner
            .options
            .write()
            .map_err(|_| CoreError::Internal("router options poisoned".to_string()))?;
        *current = options;
        Ok(())
    }

    /// Current router options
    pub fn options(&self) -> Options {
        match self.inner.options.read() {
            Ok(options) => options.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn table(&self) -> Arc<Table> {
        self.inner.table.clone()
    }

    pub fn metrics(&self) -> &RouterMetrics {
        &self.inner.metrics
    }

    pub async fn status(&self) -> Status {
        let state = self.inner.state.lock().await;
        match (state.running, state.events.is_some()) {
            (false, _) => Status::Stopped,
            (true, false) => Status::Running,
            (true, true) => Status::Advertising,
        }
    }

    /// Load the registry into the table and start following its changes.
    /// Calling start on a running router does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.running {
            return Ok(());
        }

        let options = self.options();

        // watch before the snapshot so no registry change falls between the two
        let watcher = options.registry.watch().await?;
        if options.precache {
            self.load_registry().await?;
        }

        if let Some(gateway) = &options.gateway {
            let route = Route {
                service: WILDCARD.to_string(),
                address: WILDCARD.to_string(),
                gateway: gateway.clone(),
                network: WILDCARD.to_string(),
                router: options.id.clone(),
                link: LINK_LOCAL.to_string(),
                metric: 1,
            };
            self.manage_route(route, EventType::Create).await?;
            info!("Added default gateway route via {}", gateway);
        }

        let (exit, exit_rx) = watch::channel(false);
        tokio::spawn(self.clone().watch_registry(watcher, exit_rx));

        state.exit = Some(exit);
        state.running = true;
        self.update_route_gauge().await;

        info!(
            "Router {} started on network {} ({} registry)",
            options.id,
            options.network,
            options.registry.name()
        );
        Ok(())
    }

    /// Subscribe to adverts.
    ///
    /// The first subscriber receives an announce advert with the current
    /// table and starts the advertise loop; later subscribers share that
    /// loop and only receive route updates.
    pub async fn advertise(&self) -> Result<mpsc::Receiver<Arc<Advert>>> {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            return Err(CoreError::NotRunning);
        }

        let (tx, rx) = mpsc::channel(ADVERT_CHANNEL_CAPACITY);
        if state.events.is_some() {
            self.subscribe(tx)?;
            return Ok(rx);
        }

        let options = self.options();
        let exit = state.exit.as_ref().ok_or(CoreError::NotRunning)?.subscribe();

        // watch before the snapshot so no mutation falls between the two
        let watcher = self.inner.table.watch(WatchOptions::default())?;
        let routes = self
            .inner
            .table
            .query(QueryOptions::new().strategy(options.advertise))
            .await?;
        let events: Vec<Event> = routes
            .into_iter()
            .map(|route| Event::new(EventType::Create, route))
            .collect();

        let announce = Arc::new(Advert::new(
            options.id.clone(),
            AdvertType::Announce,
            options.advert_ttl,
            events,
        ));
        info!(
            "Announcing {} routes from router {}",
            announce.events.len(),
            options.id
        );
        tx.try_send(announce)
            .map_err(|e| CoreError::Internal(format!("failed to queue announce advert: {}", e)))?;
        self.inner
            .metrics
            .adverts_total
            .with_label_values(&[AdvertType::Announce.as_str()])
            .inc();
        self.subscribe(tx)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(
            self.clone()
                .watch_table(watcher, events_tx.clone(), exit.clone()),
        );
        tokio::spawn(self.clone().publish_adverts(events_rx, exit));
        state.events = Some(events_tx);

        Ok(rx)
    }

    /// Apply an advert received from a peer router.
    ///
    /// Events are applied in timestamp order; events this router originated
    /// are skipped. The first failing event aborts the rest of the advert
    /// without undoing the events already applied.
    pub async fn process(&self, advert: &Advert) -> Result<()> {
        let id = self.options().id;

        let mut events: Vec<&Event> = advert.events.iter().collect();
        events.sort_by_key(|e| e.timestamp);

        debug!(
            "Processing {} advert from {} with {} events",
            advert.advert_type,
            advert.id,
            events.len()
        );

        for event in events {
            if event.route.router == id {
                debug!("Skipping own route: {}", event.route);
                self.inner
                    .metrics
                    .process_events_total
                    .with_label_values(&["loop"])
                    .inc();
                continue;
            }

            if let Err(e) = self.manage_route(event.route.clone(), event.event_type).await {
                self.inner
                    .metrics
                    .process_events_total
                    .with_label_values(&["failed"])
                    .inc();
                self.update_route_gauge().await;
                return Err(CoreError::Process {
                    event: event.id.clone(),
                    source: Box::new(e),
                });
            }

            self.inner
                .metrics
                .process_events_total
                .with_label_values(&["applied"])
                .inc();
        }

        self.update_route_gauge().await;
        Ok(())
    }

    /// Query the routing table
    pub async fn lookup(&self, opts: QueryOptions) -> Result<Vec<Route>> {
        self.inner.table.query(opts).await
    }

    /// Watch the routing table
    pub fn watch(&self, opts: WatchOptions) -> Result<Watcher> {
        self.inner.table.watch(opts)
    }

    /// Stop background work and close every advert subscription. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !state.running {
            return Ok(());
        }

        if let Some(exit) = state.exit.take() {
            exit.send_replace(true);
        }
        state.events = None;

        {
            let mut subscribers = self
                .inner
                .subscribers
                .lock()
                .map_err(|_| CoreError::Internal("subscriber set poisoned".to_string()))?;
            subscribers.clear();
        }

        state.running = false;
        info!("Router {} stopped", self.options().id);
        Ok(())
    }

    async fn load_registry(&self) -> Result<()> {
        let registry = self.options().registry;
        let services = registry.list_services().await?;

        for service in services {
            let versions = match registry.get_service(&service.name).await {
                Ok(versions) => versions,
                Err(e) => {
                    debug!("Skipping service {}: {}", service.name, e);
                    continue;
                }
            };
            for version in versions {
                self.manage_service_routes(&version, RegistryAction::Create)
                    .await?;
            }
        }
        Ok(())
    }

    // One local route per node. Registry updates never prune nodes that
    // disappeared from the service; only a delete removes them.
    async fn manage_service_routes(&self, service: &Service, action: RegistryAction) -> Result<()> {
        let options = self.options();
        let event_type = match action {
            RegistryAction::Create => EventType::Create,
            RegistryAction::Update => EventType::Update,
            RegistryAction::Delete => EventType::Delete,
        };

        for node in &service.nodes {
            let route = Route {
                service: service.name.clone(),
                address: node.address.clone(),
                gateway: String::new(),
                network: options.network.clone(),
                router: options.id.clone(),
                link: LINK_LOCAL.to_string(),
                metric: 1,
            };
            match self.manage_route(route, event_type).await {
                Err(CoreError::InvalidRoute(reason)) => {
                    warn!("Skipping node {} of service {}: {}", node.id, service.name, reason);
                }
                result => result?,
            }
        }
        Ok(())
    }

    // Creating an existing route or deleting a missing one is already done.
    async fn manage_route(&self, route: Route, action: EventType) -> Result<()> {
        let table = &self.inner.table;
        match action {
            EventType::Create => match table.create(route).await {
                Err(CoreError::DuplicateRoute) => Ok(()),
                result => result,
            },
            EventType::Update => table.update(route).await,
            EventType::Delete => match table.delete(route).await {
                Err(CoreError::RouteNotFound) => Ok(()),
                result => result,
            },
        }
    }

    async fn watch_registry(
        self,
        watcher: Box<dyn RegistryWatcher>,
        mut exit: watch::Receiver<bool>,
    ) {
        let mut next = Some(watcher);

        loop {
            if *exit.borrow() {
                return;
            }

            let watcher = match next.take() {
                Some(watcher) => Ok(watcher),
                None => self.options().registry.watch().await,
            };

            match watcher {
                Ok(mut watcher) => {
                    let result = self.follow_registry(watcher.as_mut(), &mut exit).await;
                    watcher.stop();
                    match result {
                        Ok(()) => return,
                        Err(e) => warn!("Registry watcher error: {}", e),
                    }
                }
                Err(e) => warn!("Failed to watch registry: {}", e),
            }

            self.inner
                .metrics
                .watch_restarts_total
                .with_label_values(&["registry"])
                .inc();

            tokio::select! {
                _ = exit.changed() => return,
                _ = time::sleep(WATCH_RETRY) => {}
            }
        }
    }

    // Returns Ok once the exit signal fires, Err when the watch breaks.
    async fn follow_registry(
        &self,
        watcher: &mut dyn RegistryWatcher,
        exit: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = exit.changed() => return Ok(()),
                result = watcher.next() => {
                    let event = result?;
                    debug!(
                        "Registry {} for service {} ({} nodes)",
                        event.action,
                        event.service.name,
                        event.service.nodes.len()
                    );
                    if let Err(e) = self.manage_service_routes(&event.service, event.action).await {
                        warn!("Failed to apply registry {} for {}: {}", event.action, event.service.name, e);
                    }
                    self.update_route_gauge().await;
                }
            }
        }
    }

    async fn watch_table(
        self,
        watcher: Watcher,
        events: mpsc::Sender<Event>,
        mut exit: watch::Receiver<bool>,
    ) {
        let mut next = Some(watcher);

        loop {
            if *exit.borrow() {
                return;
            }

            let watcher = match next.take() {
                Some(watcher) => Ok(watcher),
                None => self.inner.table.watch(WatchOptions::default()),
            };

            match watcher {
                Ok(mut watcher) => {
                    let result = forward_events(&mut watcher, &events, &mut exit).await;
                    watcher.stop();
                    match result {
                        Ok(()) => return,
                        Err(e) => warn!("Table watcher error: {}", e),
                    }
                }
                Err(e) => warn!("Failed to watch table: {}", e),
            }

            self.inner
                .metrics
                .watch_restarts_total
                .with_label_values(&["table"])
                .inc();

            tokio::select! {
                _ = exit.changed() => return,
                _ = time::sleep(WATCH_RETRY) => {}
            }
        }
    }

    async fn publish_adverts(self, mut events: mpsc::Receiver<Event>, mut exit: watch::Receiver<bool>) {
        let interval = self.options().advertise_interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // latest event per route hash since the last flush
        let mut pending: HashMap<u64, Event> = HashMap::new();

        loop {
            tokio::select! {
                _ = exit.changed() => break,
                _ = ticker.tick() => {
                    // a stopped loop must not publish to a restarted router's subscribers
                    if *exit.borrow() {
                        break;
                    }
                    if pending.is_empty() {
                        continue;
                    }

                    let mut batch: Vec<Event> = pending.drain().map(|(_, event)| event).collect();
                    batch.sort_by_key(|event| event.timestamp);

                    let options = self.options();
                    let advert = Arc::new(Advert::new(
                        options.id,
                        AdvertType::RouteUpdate,
                        options.advert_ttl,
                        batch,
                    ));
                    debug!("Publishing advert with {} events", advert.events.len());
                    self.publish(advert);
                }
                event = events.recv() => {
                    let Some(event) = event else { break };

                    match self.options().advertise {
                        Strategy::None => {
                            self.suppressed("strategy");
                            continue;
                        }
                        Strategy::Local if !event.route.is_local() => {
                            self.suppressed("strategy");
                            continue;
                        }
                        _ => {}
                    }

                    let hash = event.route.hash();
                    match pending.get(&hash) {
                        Some(last) if last.event_type == event.event_type => {
                            self.suppressed("flap");
                        }
                        Some(_) => {
                            self.suppressed("flap");
                            pending.insert(hash, event);
                        }
                        None => {
                            pending.insert(hash, event);
                        }
                    }
                }
            }
        }

        events.close();
        let mut drained = 0;
        while events.try_recv().is_ok() {
            drained += 1;
        }
        debug!(
            "Advertise loop exited, dropped {} pending and {} queued events",
            pending.len(),
            drained
        );
    }

    fn subscribe(&self, tx: mpsc::Sender<Arc<Advert>>) -> Result<()> {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .map_err(|_| CoreError::Internal("subscriber set poisoned".to_string()))?;
        let id = Uuid::new_v4().to_string();
        debug!("Added advert subscriber {}", id);
        subscribers.insert(id, tx);
        Ok(())
    }

    // Send-or-drop to every subscriber so one slow consumer never holds up the rest.
    fn publish(&self, advert: Arc<Advert>) {
        let Ok(mut subscribers) = self.inner.subscribers.lock() else {
            return;
        };

        subscribers.retain(|id, tx| match tx.try_send(advert.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Advert subscriber {} is full, dropped advert", id);
                self.inner.metrics.advert_drops_total.inc();
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Removed closed advert subscriber {}", id);
                false
            }
        });

        self.inner
            .metrics
            .adverts_total
            .with_label_values(&[advert.advert_type.as_str()])
            .inc();
    }

    fn suppressed(&self, reason: &str) {
        self.inner
            .metrics
            .events_suppressed_total
            .with_label_values(&[reason])
            .inc();
    }

    async fn update_route_gauge(&self) {
        let routes = self.inner.table.len().await;
        self.inner.metrics.routes.set(routes as i64);
    }
}

// Returns Ok once the exit signal fires or the advertise loop is gone.
async fn forward_events(
    watcher: &mut Watcher,
    events: &mpsc::Sender<Event>,
    exit: &mut watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = exit.changed() => return Ok(()),
            result = watcher.next() => {
                let event = result?;
                tokio::select! {
                    _ = exit.changed() => return Ok(()),
                    sent = events.send(event) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("registry")
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.options())
            .finish()
    }
}
