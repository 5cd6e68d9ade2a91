//! Durable key/value storage for client state.
//!
//! The session envelope is written under a single fixed key
//! ([`AUTH_STORAGE_KEY`]). Three backends are provided:
//! - `FileStorage`: one JSON file per key in the user's data directory
//! - `KeyringStorage`: values kept in the OS keychain
//! - `MemoryStorage`: process-local map, used for ephemeral session-scoped
//!   data and in tests

pub mod file;
pub mod keychain;
pub mod memory;

use anyhow::Result;

pub use file::FileStorage;
pub use keychain::KeyringStorage;
pub use memory::MemoryStorage;

/// Storage key holding the persisted session envelope
pub const AUTH_STORAGE_KEY: &str = "auth-storage";

/// A string-valued key/value store.
///
/// Reads return `Ok(None)` for absent keys; removing an absent key is not
/// an error.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}
