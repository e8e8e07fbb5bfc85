pub mod hub;

use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, mpsc, watch};

use crate::{
    dao::{quiz_cache::QuizCache, quiz_catalog::QuizCatalog, session_store::SessionStore},
    error::ServiceError,
    state::hub::{Hub, HubCommand},
};

pub use self::hub::{ClientHandle, TimerKey};

pub type SharedState = Arc<AppState>;

/// Central application state storing persistent connections, the quiz cache
/// and the database handles.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    cache: Arc<dyn QuizCache>,
    catalog: Arc<dyn QuizCatalog>,
    hub: Hub,
    hub_rx: Mutex<Option<mpsc::UnboundedReceiver<HubCommand>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a session store is installed.
    pub fn new(cache: Arc<dyn QuizCache>, catalog: Arc<dyn QuizCatalog>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (hub, hub_rx) = Hub::channel();

        Arc::new(Self {
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            cache,
            catalog,
            hub,
            hub_rx: Mutex::new(Some(hub_rx)),
        })
    }

    /// Take the receiving end of the hub dispatch channel. Valid exactly
    /// once, when the dispatcher task starts.
    pub fn take_hub_receiver(&self) -> Option<mpsc::UnboundedReceiver<HubCommand>> {
        self.hub_rx.lock().expect("hub receiver slot poisoned").take()
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Session store handle, or the degraded-mode error when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        if self.is_degraded().await == value {
            return;
        }

        let _ = self.degraded.send(value);
    }

    /// Ephemeral quiz cache shared by every hub operation.
    pub fn cache(&self) -> Arc<dyn QuizCache> {
        self.cache.clone()
    }

    /// Quiz catalog client.
    pub fn catalog(&self) -> Arc<dyn QuizCatalog> {
        self.catalog.clone()
    }

    /// Connection registry and dispatch channel of the game hub.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}
