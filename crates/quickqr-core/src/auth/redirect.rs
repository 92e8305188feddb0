use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::navigation::LOGIN_PATH;
use crate::storage::{KeyValueStorage, REDIRECT_KEY};

/// Remembers where the user was headed when they were sent to log in.
///
/// At most one path is pending; it is consumed once after the next login.
pub struct PendingRedirect {
    storage: Arc<dyn KeyValueStorage>,
    // Makes check-then-write atomic for concurrent captures
    lock: Mutex<()>,
}

impl PendingRedirect {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Store `path` unless a redirect is already pending.
    ///
    /// Returns true when this call wrote the redirect.
    pub fn capture_if_absent(&self, path: &str) -> bool {
        if is_login_path(path) {
            debug!(path, "Not capturing login page as redirect target");
            return false;
        }

        let _guard = self.guard();
        match self.storage.get(REDIRECT_KEY) {
            Ok(Some(existing)) if !existing.is_empty() => {
                debug!(pending = %existing, "Redirect already pending");
                false
            }
            Ok(_) => match self.storage.set(REDIRECT_KEY, path) {
                Ok(()) => {
                    debug!(path, "Captured post-login redirect");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Failed to store post-login redirect");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Redirect storage unavailable");
                false
            }
        }
    }

    pub fn peek(&self) -> Option<String> {
        let _guard = self.guard();
        self.read()
    }

    /// Read and delete the pending redirect
    pub fn take(&self) -> Option<String> {
        let _guard = self.guard();
        let pending = self.read()?;
        if let Err(e) = self.storage.remove(REDIRECT_KEY) {
            warn!(error = %e, "Failed to clear post-login redirect");
        }
        Some(pending)
    }

    fn read(&self) -> Option<String> {
        match self.storage.get(REDIRECT_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, "Redirect storage unavailable");
                None
            }
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_login_path(path: &str) -> bool {
    let route = path.split(['?', '#']).next().unwrap_or(path);
    route.trim_end_matches('/') == LOGIN_PATH
}
