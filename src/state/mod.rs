mod hub;
/// Poll phase transitions and record construction.
pub mod lifecycle;
/// Poll definitions, requesters and close reasons.
pub mod poll;

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{
        record_store::RecordStore,
        session_cache::{MemorySessionCache, SessionCache},
    },
    error::ServiceError,
    services::countdown::CountdownScheduler,
};

pub use self::hub::{ClientHub, Outbound};
pub use self::poll::ConnectionId;

/// State handle shared by every handler and task.
pub type SharedState = Arc<AppState>;

/// Central application state: live-session cache, durable store, connections and timers.
pub struct AppState {
    config: AppConfig,
    record_store: RwLock<Option<Arc<dyn RecordStore>>>,
    cache: Arc<dyn SessionCache>,
    hub: ClientHub,
    countdown: CountdownScheduler,
    degraded: watch::Sender<bool>,
    lifecycle_gate: Mutex<()>,
}

impl AppState {
    /// Construct a new [`AppState`] backed by the in-process session cache.
    ///
    /// The application starts in degraded mode until a record store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let cache = Arc::new(MemorySessionCache::new(config.cache_ttl()));
        Self::with_cache(config, cache)
    }

    /// Construct a new [`AppState`] around an existing session cache.
    pub fn with_cache(config: AppConfig, cache: Arc<dyn SessionCache>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            record_store: RwLock::new(None),
            cache,
            hub: ClientHub::new(),
            countdown: CountdownScheduler::new(),
            degraded: degraded_tx,
            lifecycle_gate: Mutex::new(()),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current record store, if one is installed.
    pub async fn record_store(&self) -> Option<Arc<dyn RecordStore>> {
        let guard = self.record_store.read().await;
        guard.as_ref().cloned()
    }

    /// Return the current record store or fail with [`ServiceError::Degraded`].
    pub async fn require_record_store(&self) -> Result<Arc<dyn RecordStore>, ServiceError> {
        self.record_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new record store implementation and leave degraded mode.
    pub async fn set_record_store(&self, store: Arc<dyn RecordStore>) {
        {
            let mut guard = self.record_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current record store and enter degraded mode.
    pub async fn clear_record_store(&self) {
        {
            let mut guard = self.record_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Live-session cache holding the poll pointer, tally, roster and teacher claim.
    pub(crate) fn cache(&self) -> &Arc<dyn SessionCache> {
        &self.cache
    }

    /// Registry of open client connections.
    pub fn hub(&self) -> &ClientHub {
        &self.hub
    }

    /// Countdown timers of active polls.
    pub fn countdown(&self) -> &CountdownScheduler {
        &self.countdown
    }

    /// Serializes poll creation and closing.
    pub(crate) fn lifecycle_gate(&self) -> &Mutex<()> {
        &self.lifecycle_gate
    }
}
