//! Session lifecycle and authenticated-request core for the projectdeck
//! client.
//!
//! - [`auth::SessionStore`] holds the bearer token and user and persists them
//! - [`api::ApiClient`] attaches the token to requests and ends the session
//!   when the server rejects it
//! - [`auth::TokenMonitor`] restores the session at startup and logs out
//!   when the token expires
//!
//! [`AppContext`] wires the three together over one storage backend.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod storage;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{
    MonitorHandle, MonitorState, Principal, SessionEvent, SessionState, SessionStore,
    SessionTerminator, TokenMonitor,
};
pub use config::Config;
pub use context::AppContext;
