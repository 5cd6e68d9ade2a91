//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `SessionStore`: the current token and user, persisted on every change
//! - `SessionTerminator`: forced logout with notice and redirect
//! - `TokenMonitor`: startup hydration and periodic token expiry checks
//! - `token`: reading the expiry claim out of a bearer token

pub mod monitor;
pub mod session;
pub mod termination;
pub mod token;

pub use monitor::{MonitorHandle, MonitorState, TokenMonitor};
pub use session::{PersistedSession, Principal, SessionEvent, SessionState, SessionStore};
pub use termination::{SessionTerminator, LOGIN_PATH, SESSION_EXPIRED_NOTICE};
