//! QuickQR core - client library for the QuickQR API.
//!
//! Owns the user session and the authenticated request pipeline:
//!
//! - `storage`: durable key-value backends (file, OS keychain, memory)
//! - `auth`: session store, post-login redirect, identity-provider login
//! - `api`: the `ApiClient` every request goes through
//! - `navigation`: routes the user on sign-in and on rejected credentials
//! - `models`: request/response types with client-side validation
//! - `api_log`: bounded debug log of API calls
//! - `config`: on-disk configuration

pub mod api;
pub mod api_log;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;
pub mod storage;

pub use api::{ApiClient, ApiError, UnauthorizedHandler};
pub use api_log::ApiLog;
pub use auth::{IdentityLogin, PendingRedirect, SessionStore, Token};
pub use config::Config;
pub use navigation::{HistoryNavigator, NavigationController, Navigator};
pub use storage::{KeyValueStorage, StorageError};
