//! Table watchers

use crate::event::Event;
use crate::route::WILDCARD;
use crate::{CoreError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tracing::debug;
use uuid::Uuid;

/// Capacity of each watcher's event channel
pub const WATCHER_CAPACITY: usize = 10;

/// How long a delivery waits on a full watcher channel before dropping the event
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Watch filters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchOptions {
    /// Only deliver events for this service, `"*"` for all
    pub service: String,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            service: WILDCARD.to_string(),
        }
    }
}

impl WatchOptions {
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }
}

/// Watcher receives events for table mutations.
///
/// Stopping (or dropping) the watcher closes its channel, and the table
/// unregisters it on the next delivery attempt. A watcher left full holds
/// up each table write for `DELIVERY_TIMEOUT` before the event is dropped.
#[derive(Debug)]
pub struct Watcher {
    id: String,
    opts: WatchOptions,
    rx: mpsc::Receiver<Event>,
    done: Arc<AtomicBool>,
}

/// Table-side handle for pushing events to a watcher
#[derive(Clone, Debug)]
pub(crate) struct WatcherSink {
    tx: mpsc::Sender<Event>,
    done: Arc<AtomicBool>,
}

/// Outcome of a best-effort delivery
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Dropped,
    Closed,
}

impl Watcher {
    pub(crate) fn new(opts: WatchOptions) -> (Self, WatcherSink) {
        let (tx, rx) = mpsc::channel(WATCHER_CAPACITY);
        let done = Arc::new(AtomicBool::new(false));

        let watcher = Self {
            id: Uuid::new_v4().to_string(),
            opts,
            rx,
            done: done.clone(),
        };
        (watcher, WatcherSink { tx, done })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &WatchOptions {
        &self.opts
    }

    /// Wait for the next event matching the service filter
    pub async fn next(&mut self) -> Result<Event> {
        loop {
            if self.done.load(Ordering::Acquire) {
                return Err(CoreError::WatcherStopped);
            }

            match self.rx.recv().await {
                Some(event) => {
                    if self.opts.service == WILDCARD || self.opts.service == event.route.service {
                        return Ok(event);
                    }
                }
                None => return Err(CoreError::WatcherStopped),
            }
        }
    }

    /// Stop the watcher. Idempotent.
    pub fn stop(&mut self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.rx.close();
            debug!("Stopped watcher {}", self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatcherSink {
    /// Best-effort send: waits up to `DELIVERY_TIMEOUT` for room in the
    /// channel, then drops the event.
    pub(crate) async fn deliver(&self, event: Event) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }

        match time::timeout(DELIVERY_TIMEOUT, self.tx.send(event)).await {
            Ok(Ok(())) => Delivery::Sent,
            Ok(Err(_)) => Delivery::Closed,
            Err(_) => Delivery::Dropped,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.tx.is_closed()
    }
}
