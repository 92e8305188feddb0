//! REST API client module for the QuickQR backend.
//!
//! This module provides the `ApiClient`, the single pipeline every network
//! call goes through. It attaches the session's bearer token, and turns a
//! 401/403 from any endpoint into a logout plus a redirect to the login page.

pub mod client;
pub mod error;

pub use client::{ApiClient, UnauthorizedHandler, DEFAULT_API_BASE_URL};
pub use error::ApiError;
