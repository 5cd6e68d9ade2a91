//! Token freshness monitoring.
//!
//! `TokenMonitor` restores the session from storage at startup and then
//! watches the token's `exp` claim, forcing a logout as soon as the token
//! lapses instead of waiting for the server to reject a request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::config::Config;

use super::session::{PersistedSession, SessionStore};
use super::termination::SessionTerminator;
use super::token;

/// Refresh when fewer than this many seconds remain (auto-refresh only)
const REFRESH_WINDOW_SECS: f64 = 5.0 * 60.0;

/// Startup progress, for front-ends deciding when to issue the first
/// request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct MonitorState {
    /// The startup read of stored session data has finished
    pub hydrated: bool,
    /// Safe to make the first data request
    pub ready: bool,
}

pub struct TokenMonitor {
    terminator: SessionTerminator,
    api: Option<ApiClient>,
    hydration_timeout: Duration,
    check_interval: Duration,
    auto_refresh: bool,
    state: watch::Sender<MonitorState>,
}

impl TokenMonitor {
    pub fn new(terminator: SessionTerminator, config: &Config) -> Self {
        let (state, _) = watch::channel(MonitorState::default());
        Self {
            terminator,
            api: None,
            hydration_timeout: config.hydration_timeout(),
            check_interval: config.expiry_check_interval(),
            auto_refresh: config.auto_refresh,
            state,
        }
    }

    /// Give the monitor a gateway so it can refresh tokens nearing expiry
    /// (when auto-refresh is enabled).
    pub fn with_api(mut self, api: ApiClient) -> Self {
        self.api = Some(api);
        self
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.terminator.store()
    }

    pub fn state(&self) -> MonitorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Authenticated flag set, token present, and token not expired.
    pub fn is_authenticated(&self) -> bool {
        let session = self.store().snapshot();
        session.is_authenticated
            && session
                .token
                .as_deref()
                .map(|t| !t.is_empty() && !token::is_expired(t))
                .unwrap_or(false)
    }

    fn mark_ready(&self) {
        self.state.send_replace(MonitorState {
            hydrated: true,
            ready: true,
        });
    }

    /// Restore the session from storage, waiting at most the hydration
    /// timeout. Runs once; later calls return the current state.
    pub async fn hydrate(&self) -> MonitorState {
        if self.state().hydrated {
            return self.state();
        }

        let store = Arc::clone(self.store());
        let read = tokio::task::spawn_blocking(move || store.load_persisted());

        match tokio::time::timeout(self.hydration_timeout, read).await {
            Ok(Ok(loaded)) => self.apply_stored(loaded),
            Ok(Err(e)) => warn!(error = %e, "Hydration task failed"),
            Err(_) => warn!(
                timeout_ms = self.hydration_timeout.as_millis() as u64,
                "Stored session not read in time, continuing without it"
            ),
        }

        self.mark_ready();
        self.state()
    }

    fn apply_stored(&self, loaded: Result<Option<PersistedSession>>) {
        let store = self.store();
        match loaded {
            Ok(None) => debug!("No stored session"),
            Ok(Some(persisted)) => match persisted.state.token.as_deref() {
                Some(t) if !t.is_empty() && token::is_expired(t) => {
                    info!("Stored token expired, logging out");
                    store.logout();
                }
                _ => store.restore(persisted.state),
            },
            Err(e) => {
                warn!(error = %e, "Error parsing auth storage");
                store.clear_persisted();
                store.logout();
            }
        }
    }

    /// Start the periodic expiry check.
    ///
    /// The task waits until hydration is done, then checks immediately and
    /// every check interval for as long as the session holds a token. It
    /// re-arms whenever the session changes. Dropping the handle stops it.
    pub fn spawn(self: &Arc<Self>) -> MonitorHandle {
        let monitor = Arc::clone(self);
        MonitorHandle {
            task: tokio::spawn(async move { monitor.run().await }),
        }
    }

    async fn run(&self) {
        let mut ready = self.state.subscribe();
        while !ready.borrow_and_update().ready {
            if ready.changed().await.is_err() {
                return;
            }
        }

        let mut session = self.store().subscribe();
        loop {
            let token = session
                .borrow_and_update()
                .bearer_token()
                .map(str::to_string);

            let Some(token) = token else {
                if session.changed().await.is_err() {
                    return;
                }
                continue;
            };

            let mut ticker = tokio::time::interval(self.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !self.check(&token).await {
                            break;
                        }
                    }
                    changed = session.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // Re-evaluate against the new session
                        break;
                    }
                }
            }
        }
    }

    /// Returns false once the session has been ended.
    async fn check(&self, token: &str) -> bool {
        let now = Utc::now();
        match token::decode_claims(token) {
            Ok(claims) if !claims.is_expired_at(now) => {
                if self.auto_refresh && claims.seconds_remaining_at(now) < REFRESH_WINDOW_SECS {
                    if let Some(ref api) = self.api {
                        debug!("Token close to expiry, refreshing");
                        if let Err(e) = self.store().refresh(api).await {
                            warn!(error = %e, "Token refresh failed");
                        }
                    }
                }
                true
            }
            Ok(_) => {
                info!("Token expired during session, logging out");
                self.terminator.terminate("token expired");
                false
            }
            Err(e) => {
                warn!(error = %e, "Unreadable token, logging out");
                self.terminator.terminate("unreadable token");
                false
            }
        }
    }
}

/// Owns the periodic check task; aborts it on drop.
pub struct MonitorHandle {
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
