//! In-memory service registry

use super::{Registry, RegistryAction, RegistryEvent, RegistryWatcher, Service};
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const WATCH_CAPACITY: usize = 256;

/// MemoryRegistry keeps services in process and broadcasts their changes
pub struct MemoryRegistry {
    // Map of service name to its registration
    services: Arc<RwLock<HashMap<String, Service>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Register or replace a service
    pub async fn register(&self, service: Service) -> Result<()> {
        if service.name.is_empty() {
            return Err(CoreError::Registry("service name is empty".to_string()));
        }

        let mut services = self.services.write().await;
        let action = if services.contains_key(&service.name) {
            RegistryAction::Update
        } else {
            RegistryAction::Create
        };
        services.insert(service.name.clone(), service.clone());

        debug!("Registered service: {} ({} nodes)", service.name, service.nodes.len());
        self.notify(action, service);
        Ok(())
    }

    /// Deregister a service, reporting its last known nodes to watchers
    pub async fn deregister(&self, name: &str) -> Result<()> {
        let mut services = self.services.write().await;
        let service = services
            .remove(name)
            .ok_or_else(|| CoreError::Registry(format!("service not found: {}", name)))?;

        debug!("Deregistered service: {}", name);
        self.notify(RegistryAction::Delete, service);
        Ok(())
    }

    /// Get count of registered services
    pub async fn service_count(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }

    fn notify(&self, action: RegistryAction, service: Service) {
        // no receivers is fine, nobody is watching yet
        let _ = self.events.send(RegistryEvent { action, service });
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let services = self.services.read().await;
        let mut list: Vec<Service> = services
            .values()
            .map(|s| Service {
                name: s.name.clone(),
                version: s.version.clone(),
                nodes: Vec::new(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn get_service(&self, name: &str) -> Result<Vec<Service>> {
        let services = self.services.read().await;
        services
            .get(name)
            .cloned()
            .map(|s| vec![s])
            .ok_or_else(|| CoreError::Registry(format!("service not found: {}", name)))
    }

    async fn watch(&self) -> Result<Box<dyn RegistryWatcher>> {
        Ok(Box::new(MemoryWatcher {
            rx: Some(self.events.subscribe()),
        }))
    }
}

struct MemoryWatcher {
    rx: Option<broadcast::Receiver<RegistryEvent>>,
}

#[async_trait]
impl RegistryWatcher for MemoryWatcher {
    async fn next(&mut self) -> Result<RegistryEvent> {
        let rx = self.rx.as_mut().ok_or(CoreError::WatcherStopped)?;
        match rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Err(CoreError::Registry(format!(
                "registry watcher lagged, missed {} events",
                missed
            ))),
            Err(broadcast::error::RecvError::Closed) => Err(CoreError::WatcherStopped),
        }
    }

    fn stop(&mut self) {
        self.rx = None;
    }
}
