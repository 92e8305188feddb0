//! Navigation capability and the top-level navigation controller.
//!
//! The controller is the only place that reacts to session transitions by
//! moving the user around: it sends them to the login entry point when the
//! API rejects their credentials, and back to where they were once they sign
//! in again.

use std::sync::{Arc, Mutex, Weak};

use reqwest::StatusCode;
use tracing::{debug, info};

use crate::api::UnauthorizedHandler;
use crate::auth::{PendingRedirect, SessionChange, SessionStore};

/// Login entry point
pub const LOGIN_PATH: &str = "/login";

/// Landing page after login when nothing else was requested
pub const DEFAULT_AUTHENTICATED_PATH: &str = "/generator";

/// "Go to path" and "where am I" capabilities.
pub trait Navigator: Send + Sync {
    /// Path + query + fragment of the current location
    fn current_path(&self) -> String;

    /// Move to `path`; with `replace` the current history entry is overwritten
    fn navigate(&self, path: &str, replace: bool);
}

/// A single recorded call to [`Navigator::navigate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub path: String,
    pub replace: bool,
}

/// In-process history stack.
pub struct HistoryNavigator {
    inner: Mutex<HistoryInner>,
}

struct HistoryInner {
    entries: Vec<String>,
    navigations: Vec<Navigation>,
}

impl HistoryNavigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                entries: vec![initial_path.into()],
                navigations: Vec::new(),
            }),
        }
    }

    /// History entries, oldest first
    pub fn history(&self) -> Vec<String> {
        self.lock().entries.clone()
    }

    /// Every navigation performed so far
    pub fn navigations(&self) -> Vec<Navigation> {
        self.lock().navigations.clone()
    }

    /// Step back one entry, returning the new current path
    pub fn back(&self) -> Option<String> {
        let mut inner = self.lock();
        if inner.entries.len() > 1 {
            inner.entries.pop();
            inner.entries.last().cloned()
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> String {
        self.lock().entries.last().cloned().unwrap_or_else(|| "/".to_string())
    }

    fn navigate(&self, path: &str, replace: bool) {
        let mut inner = self.lock();
        if replace {
            inner.entries.pop();
        }
        inner.entries.push(path.to_string());
        inner.navigations.push(Navigation {
            path: path.to_string(),
            replace,
        });
        debug!(path, replace, "Navigated");
    }
}

/// Routes the user in response to session changes and authorization failures.
pub struct NavigationController {
    session: Arc<SessionStore>,
    redirects: Arc<PendingRedirect>,
    navigator: Arc<dyn Navigator>,
}

impl NavigationController {
    /// Create the controller and register it as a session observer
    pub fn install(
        session: Arc<SessionStore>,
        redirects: Arc<PendingRedirect>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            session: session.clone(),
            redirects,
            navigator,
        });

        let weak: Weak<Self> = Arc::downgrade(&controller);
        session.subscribe(move |change| {
            if let Some(controller) = weak.upgrade() {
                controller.on_session_change(change);
            }
        });

        controller
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Gate for protected views.
    ///
    /// Returns true when the view may render; otherwise remembers `path` and
    /// sends the user to log in.
    pub fn require_auth(&self, path: &str) -> bool {
        if self.session.is_authenticated() {
            return true;
        }
        debug!(path, "Protected view requested without a session");
        self.redirects.capture_if_absent(path);
        self.navigator.navigate(LOGIN_PATH, true);
        false
    }

    fn on_session_change(&self, change: SessionChange) {
        if !change.is_sign_in() {
            return;
        }
        let target = self
            .redirects
            .take()
            .unwrap_or_else(|| DEFAULT_AUTHENTICATED_PATH.to_string());
        info!(path = %target, "Signed in, restoring location");
        self.navigator.navigate(&target, true);
    }
}

impl UnauthorizedHandler for NavigationController {
    fn on_unauthorized(&self, status: StatusCode) {
        let current = self.navigator.current_path();
        self.redirects.capture_if_absent(&current);
        info!(%status, from = %current, "Session rejected, redirecting to login");
        self.navigator.navigate(LOGIN_PATH, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Token;
    use crate::storage::MemoryStorage;

    struct Harness {
        session: Arc<SessionStore>,
        redirects: Arc<PendingRedirect>,
        navigator: Arc<HistoryNavigator>,
        controller: Arc<NavigationController>,
    }

    fn harness(start: &str) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let session = Arc::new(SessionStore::new(storage.clone()));
        let redirects = Arc::new(PendingRedirect::new(storage));
        let navigator = Arc::new(HistoryNavigator::new(start));
        let controller =
            NavigationController::install(session.clone(), redirects.clone(), navigator.clone());
        Harness {
            session,
            redirects,
            navigator,
            controller,
        }
    }

    #[test]
    fn test_history_navigator_replace_and_push() {
        let nav = HistoryNavigator::new("/");
        nav.navigate("/generator", false);
        nav.navigate("/login", true);
        assert_eq!(nav.history(), vec!["/".to_string(), "/login".to_string()]);
        assert_eq!(nav.current_path(), "/login");
        assert_eq!(nav.back().as_deref(), Some("/"));
        assert_eq!(nav.back(), None);
    }

    #[test]
    fn test_login_restores_pending_redirect_once() {
        let h = harness("/login");
        h.redirects.capture_if_absent("/generator");

        h.session.login(Token::new("abc"));

        let navigations = h.navigator.navigations();
        assert_eq!(
            navigations,
            vec![Navigation {
                path: "/generator".to_string(),
                replace: true
            }]
        );
        assert_eq!(h.redirects.peek(), None);
    }

    #[test]
    fn test_login_without_redirect_lands_on_default_page() {
        let h = harness("/login");
        h.session.login(Token::new("abc"));
        assert_eq!(h.navigator.current_path(), DEFAULT_AUTHENTICATED_PATH);
    }

    #[test]
    fn test_token_refresh_does_not_navigate() {
        let h = harness("/login");
        h.session.login(Token::new("abc"));
        h.navigator.navigate("/contact-qr", false);

        h.session.login(Token::new("def"));
        assert_eq!(h.navigator.current_path(), "/contact-qr");
        assert_eq!(h.navigator.navigations().len(), 2);
    }

    #[test]
    fn test_unauthorized_captures_location_and_goes_to_login() {
        let h = harness("/pdf-designer?page=2#box");
        h.controller.on_unauthorized(StatusCode::UNAUTHORIZED);

        assert_eq!(h.redirects.peek().as_deref(), Some("/pdf-designer?page=2#box"));
        assert_eq!(h.navigator.current_path(), LOGIN_PATH);
        // Replacing history means back does not return to the protected page
        assert_eq!(h.navigator.history(), vec![LOGIN_PATH.to_string()]);
    }

    #[test]
    fn test_require_auth_gates_protected_views() {
        let h = harness("/");
        assert!(!h.controller.require_auth("/contact-qr"));
        assert_eq!(h.navigator.current_path(), LOGIN_PATH);
        assert_eq!(h.redirects.peek().as_deref(), Some("/contact-qr"));

        h.session.login(Token::new("abc"));
        assert_eq!(h.navigator.current_path(), "/contact-qr");
        assert!(h.controller.require_auth("/contact-qr"));
    }

    #[test]
    fn test_dropped_controller_stops_observing() {
        let h = harness("/login");
        let navigator = h.navigator.clone();
        let session = h.session.clone();
        drop(h.controller);

        session.login(Token::new("abc"));
        assert!(navigator.navigations().is_empty());
    }
}
