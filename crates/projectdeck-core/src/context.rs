//! Application root: owns the session store and hands it to the gateway
//! and the token monitor.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;

use crate::api::ApiClient;
use crate::auth::{
    MonitorHandle, MonitorState, Principal, SessionEvent, SessionStore, SessionTerminator,
    TokenMonitor, LOGIN_PATH,
};
use crate::config::Config;
use crate::storage::Storage;

pub struct AppContext {
    config: Config,
    store: Arc<SessionStore>,
    api: ApiClient,
    monitor: Arc<TokenMonitor>,
}

impl AppContext {
    /// Wire everything up over the storage backend chosen in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let storage = config.open_storage()?;
        Self::new(config, storage)
    }

    pub fn new(config: Config, storage: Arc<dyn Storage>) -> Result<Self> {
        let store = Arc::new(SessionStore::new(storage));
        let terminator = SessionTerminator::new(Arc::clone(&store), config.redirect_delay());
        let api = ApiClient::new(&config, terminator.clone())?;
        let monitor = Arc::new(TokenMonitor::new(terminator, &config).with_api(api.clone()));

        Ok(Self {
            config,
            store,
            api,
            monitor,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn monitor(&self) -> &Arc<TokenMonitor> {
        &self.monitor
    }

    /// Restore the stored session; see [`TokenMonitor::hydrate`].
    pub async fn hydrate(&self) -> MonitorState {
        self.monitor.hydrate().await
    }

    /// Start periodic expiry checks for as long as the handle lives.
    pub fn watch_expiry(&self) -> MonitorHandle {
        self.monitor.spawn()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.subscribe_events()
    }

    /// Collect the events already queued on `events`, for front-ends that
    /// exit right after a command instead of running an event loop.
    ///
    /// If a forced termination still has its redirect pending, the timer is
    /// cancelled and the redirect is returned now.
    pub fn settle_events(&self, events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut settled = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => settled.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let redirected = settled
            .iter()
            .any(|e| matches!(e, SessionEvent::Redirect { .. }));
        let terminator = self.api.terminator();
        if !redirected && terminator.redirect_pending() {
            terminator.cancel_redirect();
            settled.push(SessionEvent::Redirect {
                to: LOGIN_PATH.to_string(),
            });
        }
        settled
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        self.store.login(&self.api, email, password).await
    }

    pub async fn register(&self, email: &str, password: &str, full_name: &str) -> Result<()> {
        self.store.register(&self.api, email, password, full_name).await
    }

    pub async fn logout(&self) {
        self.store.logout_remote(&self.api).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.store.refresh(&self.api).await
    }

    pub async fn current_user(&self) -> Result<Principal> {
        self.store.fetch_current_user(&self.api).await
    }
}
