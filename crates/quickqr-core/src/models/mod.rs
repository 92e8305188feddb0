//! Request and response types for the QuickQR API.
//!
//! This module contains:
//!
//! - Auth payloads: `TokenResponse`, `GoogleLoginRequest`, `RegisterRequest`
//! - QR codes: `QrCodeRequest`, `ContactQrRequest`, `PdfLinkQrRequest`
//! - AI helpers: `AiSuggestionRequest`, `ContentGenerationRequest`
//! - Lost & found tags: `GenerateLostAndFoundRequest`, `UpdateQrDetailsRequest`, ...
//!
//! Requests that come from user input expose `validate()`, which runs before
//! anything is sent over the network.

pub mod ai;
pub mod auth;
pub mod lost_and_found;
pub mod qr;

use thiserror::Error;

pub use ai::{AiSuggestionRequest, AiSuggestionResponse, ContentAnalysisRequest, ContentGenerationRequest};
pub use auth::{GoogleLoginRequest, RegisterRequest, TokenResponse};
pub use lost_and_found::{
    ActionResponse, FieldVisibility, GenerateLostAndFoundRequest, LostAndFoundView,
    MarkFoundRequest, UpdateQrDetailsRequest,
};
pub use qr::{
    ContactField, ContactQrRequest, ErrorCorrectionLevel, PdfLinkQrRequest, QrCodeRequest,
    QrCodeResponse, QrCodeType, UploadedPdf,
};

/// A client-side form constraint that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("{field} exceeds {max} character limit")]
    TooLong { field: &'static str, max: usize },
}

/// Fails with `Required` when `value` is empty after trimming
pub(crate) fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::Required(field))
    } else {
        Ok(())
    }
}
