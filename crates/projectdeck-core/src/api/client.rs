//! Request gateway for the project-management REST API.
//!
//! Every call goes through [`ApiClient`], which attaches the bearer token
//! from the persisted session and inspects every response for credential
//! failures, running forced session termination when it finds one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::session::{read_persisted, LOGIN_ENDPOINT, REGISTER_ENDPOINT};
use crate::auth::SessionTerminator;
use crate::config::Config;
use crate::storage::Storage;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the project-management backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    storage: Arc<dyn Storage>,
    terminator: SessionTerminator,
    initial_backoff: Duration,
}

impl ApiClient {
    /// Create a gateway reading credentials from the terminator's store.
    pub fn new(config: &Config, terminator: SessionTerminator) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            storage: Arc::clone(terminator.store().storage()),
            terminator,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Override the first rate-limit backoff step
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn terminator(&self) -> &SessionTerminator {
        &self.terminator
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Login and register are the only calls made without a credential,
    /// and their rejections are the caller's to report.
    pub fn is_auth_endpoint(path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path.contains(LOGIN_ENDPOINT) || path.contains(REGISTER_ENDPOINT)
    }

    /// Bearer token from the stored session.
    ///
    /// Read fresh from storage on every call so a logout elsewhere is seen
    /// immediately.
    fn persisted_bearer(&self) -> Option<String> {
        match read_persisted(self.storage.as_ref()) {
            Ok(Some(persisted)) => {
                let token = persisted.state.bearer_token().map(str::to_string);
                debug!(
                    has_token = persisted.state.token.is_some(),
                    is_authenticated = persisted.state.is_authenticated,
                    token_len = token.as_ref().map(|t| t.len()).unwrap_or(0),
                    "Auth check"
                );
                token
            }
            Ok(None) => {
                debug!("No auth storage found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Error reading auth storage");
                None
            }
        }
    }

    fn auth_headers(&self, path: &str) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if Self::is_auth_endpoint(path) {
            debug!(path, "Skipping auth for login/register endpoint");
            return Ok(headers);
        }
        if let Some(token) = self.persisted_bearer() {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Turn a non-success response into an error, terminating the session
    /// when the rejection is about the credential.
    async fn check_response(&self, path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            debug!(%status, path, "API response");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ApiError::from_status(status, &body);
        warn!(%status, path, detail = err.detail().unwrap_or_default(), "API error");

        if !Self::is_auth_endpoint(path) && ApiError::invalidates_session(status, &body) {
            self.terminator.terminate(&err.to_string());
        } else if status == StatusCode::FORBIDDEN {
            debug!(path, "Auth error but not token-related");
        }
        Err(err.into())
    }

    /// Send a request, retrying rate-limited attempts with exponential
    /// backoff. Credentials are re-read for every attempt.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            debug!(%method, path, "API request");
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(self.auth_headers(path)?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .map_err(ApiError::from)
                .with_context(|| format!("Failed to send {} request to {}", method, url))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited.into());
                }
                warn!(url = %url, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff *= 2; // Exponential backoff
                continue;
            }

            return self.check_response(path, response).await;
        }
    }

    async fn parse_json<T: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<T> {
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", path))?;
        // Empty bodies (204, bare 200) read as JSON null
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)).into())
    }

    // ===== Verbs =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Self::parse_json(path, response).await
    }

    pub async fn get_value(&self, path: &str) -> Result<Value> {
        self.get(path).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Self::parse_json(path, response).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(Method::PUT, path, Some(body)).await?;
        Self::parse_json(path, response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send::<()>(Method::DELETE, path, None).await?;
        Ok(())
    }
}
