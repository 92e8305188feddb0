use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::storage::{KeyValueStorage, TOKEN_KEY};

/// Opaque bearer credential issued by the API.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    // Never print the credential itself
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Describes one `login`/`logout` mutation as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionChange {
    pub was_authenticated: bool,
    pub is_authenticated: bool,
}

impl SessionChange {
    /// True when the session went from no token to a token
    pub fn is_sign_in(&self) -> bool {
        !self.was_authenticated && self.is_authenticated
    }

    pub fn is_sign_out(&self) -> bool {
        self.was_authenticated && !self.is_authenticated
    }
}

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(SessionChange) + Send + Sync>;

#[derive(Default)]
struct SessionState {
    token: Option<Token>,
    generation: u64,
}

/// Snapshot of the session taken when a request is dispatched.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub token: Option<Token>,
    pub generation: u64,
}

/// Single source of truth for the current credential.
///
/// Memory and durable storage are updated under one lock, so after `login`
/// or `logout` returns both agree. Observers run synchronously after the
/// lock is released and before the call returns.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    state: Mutex<SessionState>,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_observer: Mutex<u64>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            state: Mutex::new(SessionState::default()),
            observers: RwLock::new(Vec::new()),
            next_observer: Mutex::new(0),
        }
    }

    /// Load a previously persisted token.
    ///
    /// Missing, unreadable or blank values all mean "no session"; this never fails.
    pub fn restore(&self) -> Option<Token> {
        let restored = match self.storage.get(TOKEN_KEY) {
            Ok(Some(value)) if !value.trim().is_empty() => Some(Token::new(value)),
            Ok(Some(_)) => {
                warn!("Ignoring blank persisted token");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Session storage unavailable, starting signed out");
                None
            }
        };

        let mut state = self.lock_state();
        state.token = restored.clone();
        debug!(restored = restored.is_some(), "Session restored");
        restored
    }

    /// Current token, from memory only
    pub fn get_token(&self) -> Option<Token> {
        self.lock_state().token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().token.is_some()
    }

    /// Incremented by every `login` and `logout`
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock_state();
        SessionSnapshot {
            token: state.token.clone(),
            generation: state.generation,
        }
    }

    pub fn login(&self, token: Token) {
        let change = {
            let mut state = self.lock_state();
            let was_authenticated = state.token.is_some();

            if let Err(e) = self.storage.set(TOKEN_KEY, token.as_str()) {
                warn!(error = %e, "Failed to persist token, session is memory-only");
            }
            state.token = Some(token);
            state.generation += 1;
            debug!(generation = state.generation, "Session login");

            SessionChange {
                was_authenticated,
                is_authenticated: true,
            }
        };
        self.notify(change);
    }

    pub fn logout(&self) {
        let change = {
            let mut state = self.lock_state();
            let was_authenticated = state.token.is_some();

            if let Err(e) = self.storage.remove(TOKEN_KEY) {
                warn!(error = %e, "Failed to remove persisted token");
            }
            state.token = None;
            state.generation += 1;
            debug!(generation = state.generation, "Session logout");

            SessionChange {
                was_authenticated,
                is_authenticated: false,
            }
        };
        self.notify(change);
    }

    /// Register an observer called after every `login`/`logout`
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(SessionChange) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_observer.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            ObserverId(*next)
        };
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, change: SessionChange) {
        // Clone the list so observers may subscribe or read the store re-entrantly
        let observers: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(change);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let session = SessionStore::new(storage.clone());
        (storage, session)
    }

    #[test]
    fn test_login_persists_before_return() {
        let (storage, session) = store();
        for token in ["abc", "def", "a.b.c"] {
            session.login(Token::new(token));
            assert_eq!(session.get_token(), Some(Token::new(token)));
            assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some(token));
        }
    }

    #[test]
    fn test_logout_clears_memory_and_storage() {
        let (storage, session) = store();
        session.login(Token::new("abc"));
        session.logout();

        assert_eq!(session.get_token(), None);
        assert!(!session.is_authenticated());
        assert_eq!(storage.get(TOKEN_KEY).unwrap(), None);

        // Logging out while signed out is harmless
        session.logout();
        assert_eq!(session.get_token(), None);
    }

    #[test]
    fn test_restore_reads_persisted_token() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(TOKEN_KEY, "persisted").unwrap();

        let session = SessionStore::new(storage);
        assert_eq!(session.get_token(), None);
        assert_eq!(session.restore(), Some(Token::new("persisted")));
        assert_eq!(session.get_token(), Some(Token::new("persisted")));
    }

    #[test]
    fn test_restore_treats_unavailable_or_blank_storage_as_signed_out() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(TOKEN_KEY, "   ").unwrap();
        let session = SessionStore::new(storage.clone());
        assert_eq!(session.restore(), None);

        storage.set_available(false);
        assert_eq!(session.restore(), None);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_unavailable_storage_degrades_to_memory_only() {
        let (storage, session) = store();
        storage.set_available(false);

        session.login(Token::new("abc"));
        assert_eq!(session.get_token(), Some(Token::new("abc")));

        session.logout();
        assert_eq!(session.get_token(), None);
    }

    #[test]
    fn test_observers_see_state_synchronously() {
        let (_storage, session) = store();
        let session = Arc::new(session);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let observed_session = session.clone();
        let observed = seen.clone();
        session.subscribe(move |change| {
            // Re-entrant read must already reflect the mutation
            let token = observed_session.get_token();
            observed.lock().unwrap().push((change, token));
        });

        session.login(Token::new("abc"));
        session.login(Token::new("def"));
        session.logout();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].0.is_sign_in());
        assert_eq!(seen[0].1, Some(Token::new("abc")));
        assert!(!seen[1].0.is_sign_in());
        assert_eq!(seen[1].1, Some(Token::new("def")));
        assert!(seen[2].0.is_sign_out());
        assert_eq!(seen[2].1, None);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let (_storage, session) = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = session.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.login(Token::new("abc"));
        session.unsubscribe(id);
        session.logout();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generation_bumps_on_every_mutation() {
        let (_storage, session) = store();
        let start = session.generation();
        session.login(Token::new("abc"));
        session.logout();
        assert_eq!(session.generation(), start + 2);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.generation, start + 2);
        assert!(snapshot.token.is_none());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = Token::new("super-secret");
        let printed = format!("{:?}", token);
        assert!(!printed.contains("super-secret"));
    }
}
