use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};

use super::Token;

/// Outcomes buffered for slow subscribers
const OUTCOME_CHANNEL_CAPACITY: usize = 16;

/// Invoked by the widget with a one-time credential assertion.
pub type AssertionCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Identity widget error: {0}")]
    Widget(String),
}

/// Third-party sign-in control.
pub trait IdentityWidget: Send + Sync {
    /// Register the callback that receives assertions for `client_id`
    fn initialize(&self, client_id: &str, callback: AssertionCallback) -> Result<(), IdentityError>;

    /// Show the sign-in button inside `target`
    fn render_button(&self, target: &str) -> Result<(), IdentityError>;
}

type WidgetLoader = Box<dyn Fn() -> Result<Arc<dyn IdentityWidget>, IdentityError> + Send + Sync>;

/// Loads the widget on first use and remembers the result.
///
/// A failed load is not retried; identity login stays unavailable and the
/// rest of the application carries on with password login.
pub struct LazyWidget {
    loader: WidgetLoader,
    loaded: OnceLock<Option<Arc<dyn IdentityWidget>>>,
}

impl LazyWidget {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn IdentityWidget>, IdentityError> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
            loaded: OnceLock::new(),
        }
    }

    /// Wrap a widget that needs no loading
    pub fn ready(widget: Arc<dyn IdentityWidget>) -> Self {
        let loaded = OnceLock::new();
        let _ = loaded.set(Some(widget));
        Self {
            loader: Box::new(|| Err(IdentityError::Unavailable("already loaded".to_string()))),
            loaded,
        }
    }

    pub fn get(&self) -> Option<Arc<dyn IdentityWidget>> {
        self.loaded
            .get_or_init(|| match (self.loader)() {
                Ok(widget) => {
                    debug!("Identity widget loaded");
                    Some(widget)
                }
                Err(e) => {
                    warn!(error = %e, "Identity widget failed to load, password login only");
                    None
                }
            })
            .clone()
    }

    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}

/// Widget whose "button" is [`ManualAssertionWidget::submit`].
///
/// Used where the assertion is obtained out of band, e.g. pasted into a terminal.
#[derive(Default)]
pub struct ManualAssertionWidget {
    client_id: Mutex<Option<String>>,
    callbacks: Mutex<Vec<AssertionCallback>>,
    rendered: Mutex<Vec<String>>,
}

impl ManualAssertionWidget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an assertion to every registered callback.
    /// Returns false when nothing has been registered yet.
    pub fn submit(&self, assertion: impl Into<String>) -> bool {
        let assertion = assertion.into();
        let callbacks: Vec<AssertionCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in &callbacks {
            callback(assertion.clone());
        }
        !callbacks.is_empty()
    }

    pub fn registration_count(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn rendered_targets(&self) -> Vec<String> {
        self.rendered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl IdentityWidget for ManualAssertionWidget {
    fn initialize(&self, client_id: &str, callback: AssertionCallback) -> Result<(), IdentityError> {
        *self.client_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(client_id.to_string());
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
        Ok(())
    }

    fn render_button(&self, target: &str) -> Result<(), IdentityError> {
        self.rendered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(target.to_string());
        Ok(())
    }
}

/// Result of one identity sign-in attempt, broadcast to subscribers
#[derive(Debug, Clone)]
pub enum IdentityOutcome {
    SignedIn(Token),
    Failed(String),
}

/// Identity-provider sign-in flow.
///
/// The widget callback exchanges each assertion for a bearer token and signs
/// in exactly once per successful exchange. `initialize` may be called any
/// number of times; the callback is registered with the widget only once.
pub struct IdentityLogin {
    api: ApiClient,
    widget: LazyWidget,
    client_id: String,
    initialized: Mutex<bool>,
    outcomes: broadcast::Sender<IdentityOutcome>,
}

impl IdentityLogin {
    pub fn new(api: ApiClient, widget: LazyWidget, client_id: impl Into<String>) -> Arc<Self> {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Arc::new(Self {
            api,
            widget,
            client_id: client_id.into(),
            initialized: Mutex::new(false),
            outcomes,
        })
    }

    pub fn is_available(&self) -> bool {
        !self.client_id.trim().is_empty() && self.widget.is_available()
    }

    /// Set up the widget and render its button into `target`.
    ///
    /// Must be called from within a tokio runtime. Returns false when identity
    /// login is unavailable; callers then offer password login only.
    pub fn initialize(self: &Arc<Self>, target: &str) -> bool {
        if self.client_id.trim().is_empty() {
            info!("No identity client id configured, password login only");
            return false;
        }
        let Some(widget) = self.widget.get() else {
            return false;
        };

        {
            let mut initialized = self.initialized.lock().unwrap_or_else(|e| e.into_inner());
            if !*initialized {
                let handle = match Handle::try_current() {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(error = %e, "Identity login needs an async runtime");
                        return false;
                    }
                };

                let login = Arc::downgrade(self);
                let callback: AssertionCallback = Arc::new(move |assertion: String| {
                    let Some(login) = login.upgrade() else {
                        return;
                    };
                    handle.spawn(async move {
                        // Outcome is broadcast; nothing else to do with it here
                        let _ = login.handle_assertion(&assertion).await;
                    });
                });

                if let Err(e) = widget.initialize(&self.client_id, callback) {
                    warn!(error = %e, "Identity widget initialization failed");
                    return false;
                }
                *initialized = true;
                debug!("Identity widget initialized");
            }
        }

        if let Err(e) = widget.render_button(target) {
            warn!(error = %e, target, "Failed to render identity sign-in button");
        }
        true
    }

    /// Exchange `assertion` for a token and sign in with it
    pub async fn handle_assertion(&self, assertion: &str) -> Result<Token, ApiError> {
        match self.api.exchange_identity_assertion(assertion).await {
            Ok(token) => {
                self.api.session().login(token.clone());
                info!("Identity provider login succeeded");
                let _ = self.outcomes.send(IdentityOutcome::SignedIn(token.clone()));
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "Identity provider login failed");
                let _ = self.outcomes.send(IdentityOutcome::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityOutcome> {
        self.outcomes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api_log::ApiLog;
    use crate::auth::SessionStore;
    use crate::storage::{KeyValueStorage, MemoryStorage, TOKEN_KEY};

    fn client(base_url: &str) -> (ApiClient, Arc<SessionStore>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let session = Arc::new(SessionStore::new(storage.clone()));
        let api_log = Arc::new(ApiLog::new(Arc::new(MemoryStorage::new()), "API"));
        let api = ApiClient::new(base_url, session.clone(), api_log).unwrap();
        (api, session, storage)
    }

    async fn mount_exchange(server: &MockServer, assertion: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/google"))
            .and(body_json(json!({ "id_token": assertion })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": token })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_initialize_registers_callback_once() {
        let (api, _session, _storage) = client("http://127.0.0.1:9");
        let widget = Arc::new(ManualAssertionWidget::new());
        let login = IdentityLogin::new(api, LazyWidget::ready(widget.clone()), "client-123");

        assert!(login.initialize("#google-button"));
        assert!(login.initialize("#google-button"));
        assert!(login.initialize("#google-button"));

        assert_eq!(widget.registration_count(), 1);
        assert_eq!(widget.rendered_targets().len(), 3);
        assert_eq!(widget.client_id().as_deref(), Some("client-123"));
    }

    #[tokio::test]
    async fn test_widget_load_failure_degrades_to_password_only() {
        let (api, session, _storage) = client("http://127.0.0.1:9");
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let widget = LazyWidget::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(IdentityError::Unavailable("script blocked".to_string()))
        });
        let login = IdentityLogin::new(api, widget, "client-123");

        assert!(!login.initialize("#google-button"));
        assert!(!login.initialize("#google-button"));
        assert!(!login.is_available());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_client_id_disables_identity_login() {
        let (api, _session, _storage) = client("http://127.0.0.1:9");
        let widget = Arc::new(ManualAssertionWidget::new());
        let login = IdentityLogin::new(api, LazyWidget::ready(widget.clone()), "");

        assert!(!login.initialize("#google-button"));
        assert_eq!(widget.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_widget_callback_signs_in() {
        let server = MockServer::start().await;
        mount_exchange(&server, "assertion-1", "token-1").await;

        let (api, session, storage) = client(&server.uri());
        let widget = Arc::new(ManualAssertionWidget::new());
        let login = IdentityLogin::new(api, LazyWidget::ready(widget.clone()), "client-123");
        assert!(login.initialize("#google-button"));

        let mut outcomes = login.subscribe();
        assert!(widget.submit("assertion-1"));

        match outcomes.recv().await.unwrap() {
            IdentityOutcome::SignedIn(token) => assert_eq!(token, Token::new("token-1")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(session.get_token(), Some(Token::new("token-1")));
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some("token-1"));

        // The exchange endpoint never receives a bearer token
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_two_rapid_assertions_each_sign_in() {
        let server = MockServer::start().await;
        mount_exchange(&server, "assertion-1", "token-1").await;
        mount_exchange(&server, "assertion-2", "token-2").await;

        let (api, session, storage) = client(&server.uri());
        let persisted = Arc::new(Mutex::new(Vec::new()));
        {
            let session_for_observer = session.clone();
            let storage = storage.clone();
            let persisted = persisted.clone();
            session.subscribe(move |change| {
                if change.is_authenticated {
                    let in_memory = session_for_observer.get_token().map(|t| t.as_str().to_string());
                    let on_disk = storage.get(TOKEN_KEY).unwrap();
                    persisted.lock().unwrap().push((in_memory, on_disk));
                }
            });
        }

        let login = IdentityLogin::new(
            api,
            LazyWidget::ready(Arc::new(ManualAssertionWidget::new())),
            "client-123",
        );
        let (first, second) = tokio::join!(
            login.handle_assertion("assertion-1"),
            login.handle_assertion("assertion-2")
        );
        assert_eq!(first.unwrap(), Token::new("token-1"));
        assert_eq!(second.unwrap(), Token::new("token-2"));

        let persisted = persisted.lock().unwrap();
        assert_eq!(persisted.len(), 2);
        for (in_memory, on_disk) in persisted.iter() {
            assert_eq!(in_memory, on_disk);
        }
        let tokens: HashSet<_> = persisted.iter().filter_map(|(t, _)| t.clone()).collect();
        assert_eq!(tokens.len(), 2);

        let current = session.get_token().unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some(current.as_str()));
    }

    #[tokio::test]
    async fn test_back_to_back_widget_callbacks_each_sign_in() {
        let server = MockServer::start().await;
        mount_exchange(&server, "assertion-1", "token-1").await;
        mount_exchange(&server, "assertion-2", "token-2").await;

        let (api, session, storage) = client(&server.uri());
        let persisted = Arc::new(Mutex::new(Vec::new()));
        {
            let session_for_observer = session.clone();
            let storage = storage.clone();
            let persisted = persisted.clone();
            session.subscribe(move |change| {
                if change.is_authenticated {
                    let in_memory = session_for_observer.get_token().map(|t| t.as_str().to_string());
                    let on_disk = storage.get(TOKEN_KEY).unwrap();
                    persisted.lock().unwrap().push((in_memory, on_disk));
                }
            });
        }

        let widget = Arc::new(ManualAssertionWidget::new());
        let login = IdentityLogin::new(api, LazyWidget::ready(widget.clone()), "client-123");
        assert!(login.initialize("#google-button"));
        assert!(login.initialize("#google-button"));
        let mut outcomes = login.subscribe();

        assert!(widget.submit("assertion-1"));
        assert!(widget.submit("assertion-2"));

        let mut signed_in = HashSet::new();
        for _ in 0..2 {
            match outcomes.recv().await.unwrap() {
                IdentityOutcome::SignedIn(token) => {
                    signed_in.insert(token.as_str().to_string());
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(
            signed_in,
            HashSet::from(["token-1".to_string(), "token-2".to_string()])
        );
        assert_eq!(widget.registration_count(), 1);

        let persisted = persisted.lock().unwrap();
        assert_eq!(persisted.len(), 2);
        for (in_memory, on_disk) in persisted.iter() {
            assert!(in_memory.is_some());
            assert_eq!(in_memory, on_disk);
        }
        let current = session.get_token().unwrap();
        assert_eq!(storage.get(TOKEN_KEY).unwrap().as_deref(), Some(current.as_str()));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_exchange_does_not_sign_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/google"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "Invalid Google token"})))
            .mount(&server)
            .await;

        let (api, session, _storage) = client(&server.uri());
        let login = IdentityLogin::new(
            api,
            LazyWidget::ready(Arc::new(ManualAssertionWidget::new())),
            "client-123",
        );
        let mut outcomes = login.subscribe();

        let err = login.handle_assertion("bogus").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Invalid Google token"));
        assert!(matches!(outcomes.recv().await.unwrap(), IdentityOutcome::Failed(_)));
        assert!(!session.is_authenticated());
    }
}
