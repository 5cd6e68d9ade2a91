//! Mock project-management backend for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use projectdeck_core::storage::{MemoryStorage, Storage, AUTH_STORAGE_KEY};
use projectdeck_core::{AppContext, Config, SessionEvent, SessionState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const PASSWORD: &str = "secret";
pub const LOGIN_TOKEN: &str = "abc.def.ghi";
pub const REFRESHED_TOKEN: &str = "new.refreshed.token";

/// One request as the backend saw it
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone, Default)]
pub struct Backend {
    pub seen: Arc<Mutex<Vec<Seen>>>,
    pub rate_limited_responses: Arc<AtomicU32>,
}

impl Backend {
    fn record(&self, uri: &Uri, headers: &HeaderMap, body: Option<Value>) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(Seen {
            path: uri.path().to_string(),
            authorization,
            body,
        });
    }

    pub fn requests_to(&self, path: &str) -> Vec<Seen> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path.ends_with(path))
            .cloned()
            .collect()
    }
}

pub fn user_json(email: &str) -> Value {
    json!({
        "id": 1,
        "email": email,
        "full_name": "A B",
        "is_active": true,
    })
}

async fn login(
    State(backend): State<Backend>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, Some(body.clone()));
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if email == "inactive@b.com" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Inactive user" })));
    }
    if body["password"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Incorrect email or password" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": LOGIN_TOKEN,
            "token_type": "bearer",
            "expires_in": 1800,
            "user": user_json(&email),
        })),
    )
}

async fn register(
    State(backend): State<Backend>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, Some(body.clone()));
    let email = body["email"].as_str().unwrap_or_default().to_string();
    if email == "taken@b.com" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Email already registered" })),
        );
    }
    if email.starts_with("bare") {
        // Variant that answers with the user record only
        return (StatusCode::OK, Json(user_json(&email)));
    }
    (
        StatusCode::OK,
        Json(json!({ "access_token": LOGIN_TOKEN, "user": user_json(&email) })),
    )
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers.get(header::AUTHORIZATION).is_some()
}

async fn projects(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Not authenticated" })));
    }
    (StatusCode::OK, Json(json!([{ "id": 7, "name": "Apollo" }])))
}

async fn me(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Not authenticated" })));
    }
    let mut user = user_json("a@b.com");
    user["full_name"] = json!("Ada Byron");
    user["is_admin"] = json!(true);
    (StatusCode::OK, Json(user))
}

async fn refresh(
    State(backend): State<Backend>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, Some(body));
    if !bearer_ok(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Not authenticated" })));
    }
    (
        StatusCode::OK,
        Json(json!({ "access_token": REFRESHED_TOKEN, "user": user_json("a@b.com") })),
    )
}

async fn logout(
    State(backend): State<Backend>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, Some(body));
    (StatusCode::OK, Json(json!({ "message": "Successfully logged out" })))
}

async fn unauthorized(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Could not validate credentials" })),
    )
}

async fn token_expired(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    (StatusCode::FORBIDDEN, Json(json!({ "detail": "Token expired" })))
}

async fn admin_only(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "detail": "Insufficient permissions" })),
    )
}

async fn scoped_out(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    // No `detail` field, only an unrelated error string
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "Invalid token scope" })),
    )
}

async fn busy(State(backend): State<Backend>, uri: Uri, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    backend.record(&uri, &headers, None);
    let remaining = backend.rate_limited_responses.load(Ordering::SeqCst);
    if remaining > 0 {
        backend.rate_limited_responses.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "detail": "slow down" })));
    }
    (StatusCode::OK, Json(json!({ "total_projects": 3 })))
}

/// Start the mock backend; returns it with its `/api/v1` base URL.
pub async fn spawn_backend() -> (Backend, String) {
    let backend = Backend::default();
    let router = Router::new()
        .route("/api/v1/auth/login", post(login))
        .route("/api/v1/auth/register", post(register))
        .route("/api/v1/auth/me", get(me))
        .route("/api/v1/auth/refresh", post(refresh))
        .route("/api/v1/auth/logout", post(logout))
        .route("/api/v1/projects", get(projects))
        .route("/api/v1/tasks", get(unauthorized))
        .route("/api/v1/ai/insights", get(token_expired))
        .route("/api/v1/admin/users", get(admin_only))
        .route("/api/v1/dashboard/stats", get(busy))
        .route("/api/v1/reports", get(scoped_out))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (backend, format!("http://{}/api/v1", addr))
}

pub fn test_config(base_url: &str) -> Config {
    Config {
        api_base_url: base_url.to_string(),
        request_timeout_secs: 5,
        redirect_delay_ms: 50,
        ..Config::default()
    }
}

/// An application context over in-memory storage the test can inspect.
pub fn context(base_url: &str, storage: Arc<MemoryStorage>) -> AppContext {
    AppContext::new(test_config(base_url), storage).unwrap()
}

pub fn stored_state(storage: &MemoryStorage) -> Option<SessionState> {
    storage.get(AUTH_STORAGE_KEY).unwrap().map(|raw| {
        let value: Value = serde_json::from_str(&raw).unwrap();
        serde_json::from_value(value["state"].clone()).unwrap()
    })
}

/// Wait for the next redirect event, giving up after a couple of seconds.
pub async fn next_redirect(events: &mut broadcast::Receiver<SessionEvent>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Redirect { to }) => return Some(to),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collect whatever events are already queued.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
