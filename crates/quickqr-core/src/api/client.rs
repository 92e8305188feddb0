//! API client for the QuickQR REST API.
//!
//! Every call goes through one pipeline: the current token is read from the
//! [`SessionStore`] at dispatch time and attached as a bearer credential, and
//! a 401/403 response invalidates the local session before the error is
//! handed back to the caller.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::api_log::{ApiLog, CallContext};
use crate::auth::{SessionStore, Token};
use crate::models::auth::validate_credentials;
use crate::models::{
    ActionResponse, AiSuggestionRequest, AiSuggestionResponse, ContactQrRequest,
    ContentAnalysisRequest, ContentGenerationRequest, GenerateLostAndFoundRequest,
    GoogleLoginRequest, LostAndFoundView, MarkFoundRequest, PdfLinkQrRequest, QrCodeRequest,
    QrCodeResponse, RegisterRequest, TokenResponse, UpdateQrDetailsRequest, UploadedPdf,
    ValidationError,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default base URL of the hosted API
pub const DEFAULT_API_BASE_URL: &str = "https://quickqr-backend.onrender.com/api/v1";

/// HTTP request timeout in seconds.
/// The hosted backend cold-starts slowly, so this is generous.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const PASSWORD_LOGIN_PATH: &str = "/auth/login";
const IDENTITY_EXCHANGE_PATH: &str = "/auth/google";
const REGISTER_PATH: &str = "/auth/register";

/// Endpoints that mint credentials; a stale token must never be sent to them
const CREDENTIAL_EXCHANGE_PATHS: [&str; 3] =
    [PASSWORD_LOGIN_PATH, IDENTITY_EXCHANGE_PATH, REGISTER_PATH];

const LOST_AND_FOUND_BASE: &str = "/lost-and-found";

const PDF_MIME_TYPE: &str = "application/pdf";

/// Reacts to the server rejecting the session (401/403).
///
/// Registered by the top-level navigation controller; called after the
/// session has been cleared, at most once per invalidated session.
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self, status: StatusCode);
}

/// API client for QuickQR.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    session: Arc<SessionStore>,
    api_log: Arc<ApiLog>,
    unauthorized: Arc<RwLock<Option<Arc<dyn UnauthorizedHandler>>>>,
    // Serializes session invalidation so concurrent 401s act once
    invalidation: Arc<Mutex<()>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, session: Arc<SessionStore>, api_log: Arc<ApiLog>) -> Result<Self> {
        Self::with_timeout(
            base_url,
            session,
            api_log,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        base_url: &str,
        session: Arc<SessionStore>,
        api_log: Arc<ApiLog>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session,
            api_log,
            unauthorized: Arc::new(RwLock::new(None)),
            invalidation: Arc::new(Mutex::new(())),
        })
    }

    /// Register the handler told about rejected sessions, replacing any previous one
    pub fn set_unauthorized_handler(&self, handler: Arc<dyn UnauthorizedHandler>) {
        *self.unauthorized.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn api_log(&self) -> &Arc<ApiLog> {
        &self.api_log
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ===== Pipeline =====

    fn is_credential_exchange(path: &str) -> bool {
        let route = path.split('?').next().unwrap_or(path);
        CREDENTIAL_EXCHANGE_PATHS.contains(&route)
    }

    /// Build a request, attaching the current token unless `path` mints credentials.
    /// Returns the session generation the request was sent under.
    fn prepare(&self, method: Method, path: &str) -> (RequestBuilder, u64) {
        let snapshot = self.session.snapshot();
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, url);

        if !Self::is_credential_exchange(path) {
            if let Some(ref token) = snapshot.token {
                builder = builder.bearer_auth(token.as_str());
            }
        }

        (builder, snapshot.generation)
    }

    /// Send a prepared request and map non-success statuses to `ApiError`
    async fn dispatch(&self, builder: RequestBuilder, path: &str, generation: u64) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|e| {
            warn!(path, error = %e, "Request failed without a response");
            ApiError::Network(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.invalidate_session(status, generation);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(path, %status, "Request rejected");
        Err(ApiError::from_status(status, &body))
    }

    /// Clear the session after a 401/403, unless it already changed since dispatch.
    fn invalidate_session(&self, status: StatusCode, generation: u64) {
        let _guard = self.invalidation.lock().unwrap_or_else(|e| e.into_inner());

        // A login or logout happened while the request was in flight: either
        // another failure already handled this session, or there is a new one
        // that this response says nothing about.
        if self.session.generation() != generation {
            debug!(%status, "Ignoring authorization failure for a superseded session");
            return;
        }

        warn!(%status, "Server rejected credentials, clearing session");
        self.session.logout();

        let handler = self
            .unauthorized
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler.on_unauthorized(status);
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let (builder, generation) = self.prepare(Method::GET, path);
        let response = self.dispatch(builder, path, generation).await?;
        Self::decode(response, path).await
    }

    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let (builder, generation) = self.prepare(Method::GET, path);
        let response = self.dispatch(builder.query(query), path, generation).await?;
        Self::decode(response, path).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let (builder, generation) = self.prepare(Method::POST, path);
        let response = self.dispatch(builder.json(body), path, generation).await?;
        Self::decode(response, path).await
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T, ApiError> {
        let (builder, generation) = self.prepare(Method::POST, path);
        let response = self.dispatch(builder.form(form), path, generation).await?;
        Self::decode(response, path).await
    }

    async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<T, ApiError> {
        let (builder, generation) = self.prepare(Method::POST, path);
        let response = self.dispatch(builder.multipart(form), path, generation).await?;
        Self::decode(response, path).await
    }

    // ===== Authentication =====

    fn token_from(response: TokenResponse) -> Result<Token, ApiError> {
        if response.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse("Empty access token".to_string()));
        }
        Ok(Token::new(response.access_token))
    }

    /// Password login: exchanges form-encoded credentials for a token and signs in
    pub async fn login_with_password(&self, username: &str, password: &str) -> Result<Token, ApiError> {
        validate_credentials(username, password)?;

        let response: TokenResponse = self
            .post_form(
                PASSWORD_LOGIN_PATH,
                &[("username", username.trim()), ("password", password)],
            )
            .await?;
        let token = Self::token_from(response)?;

        self.session.login(token.clone());
        debug!("Password login succeeded");
        Ok(token)
    }

    /// Exchange an identity-provider assertion for a bearer token.
    ///
    /// Does not sign in; see [`crate::auth::IdentityLogin`].
    pub async fn exchange_identity_assertion(&self, assertion: &str) -> Result<Token, ApiError> {
        if assertion.trim().is_empty() {
            return Err(ValidationError::Required("Identity assertion").into());
        }
        let body = GoogleLoginRequest {
            id_token: assertion.to_string(),
        };
        let response: TokenResponse = self.post(IDENTITY_EXCHANGE_PATH, &body).await?;
        Self::token_from(response)
    }

    /// Create an account and sign in with the token the server returns
    pub async fn register(&self, email: &str, password: &str) -> Result<Token, ApiError> {
        let body = RegisterRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        body.validate()?;

        let response: TokenResponse = self.post(REGISTER_PATH, &body).await?;
        let token = Self::token_from(response)?;
        self.session.login(token.clone());
        Ok(token)
    }

    pub fn logout(&self) {
        self.session.logout();
    }

    // ===== QR codes =====

    pub async fn generate_qr(&self, request: &QrCodeRequest) -> Result<QrCodeResponse, ApiError> {
        request.validate()?;
        self.post("/qr/generate", request).await
    }

    pub async fn generate_contact_qr(&self, request: &ContactQrRequest) -> Result<QrCodeResponse, ApiError> {
        request.validate()?;
        self.post("/qr/generate-contact", request).await
    }

    pub async fn generate_pdf_link_qr(&self, request: &PdfLinkQrRequest) -> Result<QrCodeResponse, ApiError> {
        request.validate()?;
        self.post("/qr/generate-pdf-link", request).await
    }

    /// Upload a PDF so it can be linked from a QR code
    pub async fn upload_pdf(&self, file_name: &str, contents: Vec<u8>) -> Result<UploadedPdf, ApiError> {
        if contents.is_empty() {
            return Err(ValidationError::Required("PDF file").into());
        }
        let part = Self::file_part(file_name, contents, PDF_MIME_TYPE)?;
        self.post_multipart("/upload-pdf", Form::new().part("file", part)).await
    }

    /// Nothing has been sent when this fails, so it is never a network error
    fn file_part(file_name: &str, contents: Vec<u8>, mime: &str) -> Result<Part, ApiError> {
        Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ApiError::InvalidRequest(format!("Bad content type {}: {}", mime, e)))
    }

    pub async fn qr_types(&self) -> Result<serde_json::Value, ApiError> {
        self.get("/qr/types").await
    }

    pub async fn error_correction_levels(&self) -> Result<serde_json::Value, ApiError> {
        self.get("/qr/error-correction-levels").await
    }

    pub async fn validate_url(&self, url: &str) -> Result<serde_json::Value, ApiError> {
        self.post("/qr/validate-url", &serde_json::json!({ "url": url })).await
    }

    // ===== AI =====

    pub async fn ai_suggestions(&self, request: &AiSuggestionRequest) -> Result<AiSuggestionResponse, ApiError> {
        request.validate()?;
        self.post("/ai/suggestions", request).await
    }

    pub async fn analyze_content(&self, request: &ContentAnalysisRequest) -> Result<serde_json::Value, ApiError> {
        self.post("/ai/analyze", request).await
    }

    pub async fn generate_content(&self, request: &ContentGenerationRequest) -> Result<serde_json::Value, ApiError> {
        request.validate()?;
        self.post("/ai/generate-content", request).await
    }

    pub async fn ai_health(&self) -> Result<serde_json::Value, ApiError> {
        self.get("/ai/health").await
    }

    pub async fn health(&self) -> Result<serde_json::Value, ApiError> {
        self.get("/health").await
    }

    // ===== Lost & found =====

    /// Run a lost & found call, recording start and outcome in the API log
    async fn logged<T, F>(
        &self,
        endpoint: &str,
        method: &str,
        request: serde_json::Value,
        context: CallContext<'_>,
        call: F,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: std::future::Future<Output = Result<serde_json::Value, ApiError>>,
    {
        self.api_log
            .log_api_call(endpoint, method, Some(&request), None, None, context);

        match call.await {
            Ok(value) => {
                self.api_log
                    .log_api_call(endpoint, method, Some(&request), Some(&value), None, context);
                serde_json::from_value(value).map_err(|e| {
                    ApiError::InvalidResponse(format!("Unexpected response from {}: {}", endpoint, e))
                })
            }
            Err(e) => {
                let failure: &dyn std::fmt::Display = &e;
                self.api_log
                    .log_api_call(endpoint, method, Some(&request), None, Some(failure), context);
                Err(e)
            }
        }
    }

    fn to_log_value<B: Serialize>(body: &B) -> serde_json::Value {
        serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
    }

    pub async fn generate_lost_and_found_qr(
        &self,
        request: &GenerateLostAndFoundRequest,
    ) -> Result<QrCodeResponse, ApiError> {
        request.validate()?;
        let endpoint = format!("{}/generate", LOST_AND_FOUND_BASE);
        self.logged(
            &endpoint,
            "POST",
            Self::to_log_value(request),
            CallContext::default(),
            self.post::<serde_json::Value, _>(&endpoint, request),
        )
        .await
    }

    pub async fn update_qr_details(&self, request: &UpdateQrDetailsRequest) -> Result<ActionResponse, ApiError> {
        request.validate()?;
        let endpoint = format!("{}/update-details", LOST_AND_FOUND_BASE);
        let context = CallContext {
            user_id: request.user_id.as_deref(),
            qr_id: Some(&request.qr_id),
        };
        self.logged(
            &endpoint,
            "POST",
            Self::to_log_value(request),
            context,
            self.post::<serde_json::Value, _>(&endpoint, request),
        )
        .await
    }

    pub async fn get_lost_and_found_qr(&self, qr_id: &str, user_id: &str) -> Result<LostAndFoundView, ApiError> {
        if qr_id.trim().is_empty() {
            return Err(ValidationError::Required("QR id").into());
        }
        let endpoint = format!("{}/{}", LOST_AND_FOUND_BASE, qr_id.trim());
        let context = CallContext {
            user_id: Some(user_id),
            qr_id: Some(qr_id),
        };
        self.logged(
            &endpoint,
            "GET",
            serde_json::json!({ "qr_id": qr_id, "user_id": user_id }),
            context,
            self.get_with_query::<serde_json::Value, _>(&endpoint, &[("user_id", user_id)]),
        )
        .await
    }

    pub async fn mark_item_found(&self, request: &MarkFoundRequest) -> Result<ActionResponse, ApiError> {
        request.validate()?;
        let endpoint = format!("{}/mark-found", LOST_AND_FOUND_BASE);
        let context = CallContext {
            user_id: Some(&request.user_id),
            qr_id: Some(&request.qr_id),
        };
        self.logged(
            &endpoint,
            "POST",
            Self::to_log_value(request),
            context,
            self.post::<serde_json::Value, _>(&endpoint, request),
        )
        .await
    }

    pub async fn user_qrs(&self, user_id: &str) -> Result<serde_json::Value, ApiError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::Required("User id").into());
        }
        let endpoint = format!("{}/user/{}/qrs", LOST_AND_FOUND_BASE, user_id.trim());
        let context = CallContext {
            user_id: Some(user_id),
            qr_id: None,
        };
        self.logged(
            &endpoint,
            "GET",
            serde_json::json!({ "user_id": user_id }),
            context,
            self.get::<serde_json::Value>(&endpoint),
        )
        .await
    }
}
