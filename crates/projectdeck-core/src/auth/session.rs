use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::storage::{MemoryStorage, Storage, AUTH_STORAGE_KEY};

/// Envelope version written alongside the session state
const STORAGE_VERSION: u32 = 0;

/// Buffer for session lifecycle events. Slow subscribers lag rather than
/// block the store.
const EVENT_BUFFER_SIZE: usize = 32;

pub const LOGIN_ENDPOINT: &str = "/auth/login";
pub const REGISTER_ENDPOINT: &str = "/auth/register";
const REFRESH_ENDPOINT: &str = "/auth/refresh";
const ME_ENDPOINT: &str = "/auth/me";
const LOGOUT_ENDPOINT: &str = "/auth/logout";

/// The authenticated user as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Principal {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Older backends omit the flag; absence means not an admin.
    #[serde(default)]
    pub is_admin: bool,
}

fn default_active() -> bool {
    true
}

impl Principal {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}

/// Who is logged in, with what credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionState {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<Principal>,
    #[serde(rename = "isAuthenticated", default)]
    pub is_authenticated: bool,
}

impl SessionState {
    /// A completed login. Refuses an empty token so an authenticated state
    /// always carries a usable credential.
    pub fn authenticated(token: String, user: Principal) -> Result<Self> {
        if token.trim().is_empty() {
            anyhow::bail!("Server returned an empty access token");
        }
        Ok(Self {
            token: Some(token),
            user: Some(user),
            is_authenticated: true,
        })
    }

    /// The token to present as a bearer credential, if this state is
    /// authenticated and the token is non-empty.
    pub fn bearer_token(&self) -> Option<&str> {
        if !self.is_authenticated {
            return None;
        }
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Drop the authenticated flag when the rest of the state can't back it.
    fn normalized(mut self) -> Self {
        if self.is_authenticated && (self.bearer_token().is_none() || self.user.is_none()) {
            self.is_authenticated = false;
        }
        self
    }
}

/// The layout written under [`AUTH_STORAGE_KEY`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub version: u32,
}

impl PersistedSession {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Stored session is corrupt")
    }
}

/// Session lifecycle notifications for front-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { email: String },
    LoggedOut,
    /// Transient message to show the user
    Notice(String),
    /// Navigate to the given entry point
    Redirect { to: String },
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    user: Principal,
}

/// Single source of truth for the current session.
///
/// Every mutation is written through to durable storage before it becomes
/// visible in memory.
pub struct SessionStore {
    state: watch::Sender<SessionState>,
    storage: Arc<dyn Storage>,
    ephemeral: Arc<MemoryStorage>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            state,
            storage,
            ephemeral: Arc::new(MemoryStorage::new()),
            events,
        }
    }

    // ===== State access =====

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    pub fn user(&self) -> Option<Principal> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    pub fn is_admin(&self) -> bool {
        let state = self.state.borrow();
        state.is_authenticated && state.user.as_ref().map(|u| u.is_admin).unwrap_or(false)
    }

    /// Watch the in-memory session for changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Scratch space scoped to the current session; wiped on forced
    /// termination.
    pub fn ephemeral(&self) -> &Arc<MemoryStorage> {
        &self.ephemeral
    }

    // ===== Persistence =====

    /// Read and parse the stored envelope. `Ok(None)` when nothing is stored;
    /// `Err` when the stored value can't be read or parsed.
    pub fn load_persisted(&self) -> Result<Option<PersistedSession>> {
        read_persisted(self.storage.as_ref())
    }

    fn persist(&self, state: &SessionState) -> Result<()> {
        let envelope = PersistedSession {
            state: state.clone(),
            version: STORAGE_VERSION,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.storage
            .set(AUTH_STORAGE_KEY, &raw)
            .context("Failed to save session")
    }

    /// Remove the stored envelope entirely
    pub fn clear_persisted(&self) {
        if let Err(e) = self.storage.remove(AUTH_STORAGE_KEY) {
            warn!(error = %e, "Failed to remove stored session");
        }
    }

    /// Adopt a previously persisted state without writing it back.
    pub fn restore(&self, state: SessionState) {
        let state = state.normalized();
        debug!(
            authenticated = state.is_authenticated,
            token_len = state.token.as_ref().map(|t| t.len()).unwrap_or(0),
            "Session restored from storage"
        );
        if state.is_authenticated {
            info!("Auth token restored from storage");
        }
        self.state.send_replace(state);
    }

    /// Persist then publish a new authenticated state.
    fn establish(&self, token: String, user: Principal) -> Result<()> {
        let state = SessionState::authenticated(token, user)?;
        self.persist(&state)?;
        let email = state.user.as_ref().map(|u| u.email.clone()).unwrap_or_default();
        self.state.send_replace(state);
        self.publish(SessionEvent::LoggedIn { email });
        Ok(())
    }

    /// Reset the in-memory session without touching storage.
    pub(crate) fn reset_memory(&self) {
        let previous = self.state.send_replace(SessionState::default());
        if previous != SessionState::default() {
            self.publish(SessionEvent::LoggedOut);
        }
    }

    // ===== Operations =====

    pub async fn login(&self, api: &ApiClient, email: &str, password: &str) -> Result<()> {
        let body = json!({
            "email": email,
            "password": password,
        });
        let auth: AuthResponse = api
            .post(LOGIN_ENDPOINT, &body)
            .await
            .inspect_err(|e| error!(error = %e, "Login failed"))?;

        self.establish(auth.access_token, auth.user)?;
        info!("Login successful");
        Ok(())
    }

    /// Create an account and log into it.
    ///
    /// The backend derives a username from the local part of the email.
    pub async fn register(
        &self,
        api: &ApiClient,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<()> {
        let body = json!({
            "email": email,
            "username": username_from_email(email),
            "full_name": full_name,
            "password": password,
        });
        let response: Value = api
            .post(REGISTER_ENDPOINT, &body)
            .await
            .inspect_err(|e| error!(error = %e, "Registration failed"))?;

        if response.get("access_token").is_some() {
            let auth: AuthResponse = serde_json::from_value(response)
                .context("Failed to parse registration response")?;
            self.establish(auth.access_token, auth.user)?;
            info!("Registration successful");
            return Ok(());
        }

        // Backends that answer with the bare user record need a login to
        // obtain a token.
        debug!("Registration returned no token, logging in");
        self.login(api, email, password).await
    }

    /// Clear the session. Idempotent; storage failures are logged.
    pub fn logout(&self) {
        if let Err(e) = self.persist(&SessionState::default()) {
            warn!(error = %e, "Failed to persist logout");
        }
        self.reset_memory();
        info!("Logged out");
    }

    /// Tell the server we're leaving, then log out locally regardless of
    /// the answer.
    pub async fn logout_remote(&self, api: &ApiClient) {
        if self.is_authenticated() {
            if let Err(e) = api.post::<Value, _>(LOGOUT_ENDPOINT, &json!({})).await {
                debug!(error = %e, "Server logout failed");
            }
        }
        self.logout();
    }

    /// Exchange the current token for a fresh one.
    pub async fn refresh(&self, api: &ApiClient) -> Result<()> {
        if !self.is_authenticated() {
            anyhow::bail!("No active session to refresh");
        }
        let auth: AuthResponse = api.post(REFRESH_ENDPOINT, &json!({})).await?;
        self.establish(auth.access_token, auth.user)?;
        debug!("Token refreshed");
        Ok(())
    }

    /// Re-fetch the current user's record and store it.
    pub async fn fetch_current_user(&self, api: &ApiClient) -> Result<Principal> {
        let user: Principal = api.get(ME_ENDPOINT).await?;

        let mut state = self.snapshot();
        if state.is_authenticated {
            state.user = Some(user.clone());
            self.persist(&state)?;
            self.state.send_replace(state);
        }
        Ok(user)
    }
}

pub(crate) fn read_persisted(storage: &dyn Storage) -> Result<Option<PersistedSession>> {
    match storage.get(AUTH_STORAGE_KEY)? {
        Some(raw) => Ok(Some(PersistedSession::parse(&raw)?)),
        None => Ok(None),
    }
}

/// Everything before the `@`, or the whole string if there is none
pub fn username_from_email(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
