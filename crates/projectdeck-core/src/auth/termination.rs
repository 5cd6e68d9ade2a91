//! Forced session termination.
//!
//! Run when the server rejects the credential or the token is found to be
//! expired: wipe stored session data, tell the user, and send them to the
//! login entry point after a short pause. There is no retry; the user has
//! to authenticate again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::session::{SessionEvent, SessionStore};

/// Where users go to authenticate again
pub const LOGIN_PATH: &str = "/login";

pub const SESSION_EXPIRED_NOTICE: &str = "Your session has expired. Redirecting to login...";

struct Inner {
    store: Arc<SessionStore>,
    redirect_delay: Duration,
    redirect_pending: Arc<AtomicBool>,
    redirect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut task) = self.redirect_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Cheap to clone; all clones share one pending redirect.
#[derive(Clone)]
pub struct SessionTerminator {
    inner: Arc<Inner>,
}

impl SessionTerminator {
    pub fn new(store: Arc<SessionStore>, redirect_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                redirect_delay,
                redirect_pending: Arc::new(AtomicBool::new(false)),
                redirect_task: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn redirect_pending(&self) -> bool {
        self.inner.redirect_pending.load(Ordering::SeqCst)
    }

    /// Clear the session and schedule the redirect to login.
    ///
    /// Safe to call repeatedly: storage is cleared every time, but only one
    /// notice and redirect are in flight at once. Must be called from within
    /// a tokio runtime.
    pub fn terminate(&self, reason: &str) {
        warn!(reason, "Authentication failed - clearing session and redirecting to login");

        let store = &self.inner.store;
        store.reset_memory();
        store.clear_persisted();
        store.ephemeral().clear();

        if self.inner.redirect_pending.swap(true, Ordering::SeqCst) {
            debug!("Redirect already scheduled");
            return;
        }

        store.publish(SessionEvent::Notice(SESSION_EXPIRED_NOTICE.to_string()));

        let delay = self.inner.redirect_delay;
        let pending = Arc::clone(&self.inner.redirect_pending);
        let events_store = Arc::clone(store);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events_store.publish(SessionEvent::Redirect {
                to: LOGIN_PATH.to_string(),
            });
            pending.store(false, Ordering::SeqCst);
        });

        if let Ok(mut slot) = self.inner.redirect_task.lock() {
            *slot = Some(task);
        }
    }

    /// Drop a scheduled redirect, e.g. on shutdown.
    pub fn cancel_redirect(&self) {
        if let Ok(mut slot) = self.inner.redirect_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        self.inner.redirect_pending.store(false, Ordering::SeqCst);
    }
}
