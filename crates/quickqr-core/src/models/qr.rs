use serde::{Deserialize, Serialize};

use super::{require, ValidationError};

/// Pixel size used by the generator pages
pub const DEFAULT_QR_SIZE: u32 = 512;

/// Quiet-zone width in modules
pub const DEFAULT_BORDER: u32 = 4;

pub const DEFAULT_FOREGROUND: &str = "#000000";
pub const DEFAULT_BACKGROUND: &str = "#FFFFFF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrCodeType {
    Url,
    Text,
    Contact,
    Wifi,
    Email,
    Phone,
    Sms,
    Content,
    ContactQr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorCorrectionLevel {
    L,
    #[default]
    M,
    Q,
    H,
}

impl std::str::FromStr for ErrorCorrectionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L" => Ok(Self::L),
            "M" => Ok(Self::M),
            "Q" => Ok(Self::Q),
            "H" => Ok(Self::H),
            other => Err(format!("unknown error correction level: {other}")),
        }
    }
}

/// Body of `POST /qr/generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeRequest {
    pub content: String,
    pub qr_type: QrCodeType,
    pub size: u32,
    pub error_correction: ErrorCorrectionLevel,
    pub border: u32,
    pub foreground_color: String,
    pub background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl QrCodeRequest {
    /// A request with the generator's default styling
    pub fn new(qr_type: QrCodeType, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            qr_type,
            size: DEFAULT_QR_SIZE,
            error_correction: ErrorCorrectionLevel::default(),
            border: DEFAULT_BORDER,
            foreground_color: DEFAULT_FOREGROUND.to_string(),
            background_color: DEFAULT_BACKGROUND.to_string(),
            logo_url: None,
            title: None,
            description: None,
        }
    }

    /// Plain-text QR, content trimmed as on the name page
    pub fn text(content: &str) -> Self {
        Self::new(QrCodeType::Text, content.trim())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Content", &self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodeResponse {
    pub success: bool,
    /// Usually a `data:image/png;base64,...` URL
    pub qr_code_data: Option<String>,
    pub qr_id: Option<String>,
    pub view_url: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl QrCodeResponse {
    /// Base64 image payload with any data-URL prefix removed
    pub fn image_base64(&self) -> Option<&str> {
        let data = self.qr_code_data.as_deref()?;
        Some(match data.split_once(";base64,") {
            Some((_, payload)) => payload,
            None => data,
        })
    }
}

/// A contact-card field and whether it is shown to whoever scans the code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactField {
    pub value: String,
    pub show: bool,
}

impl ContactField {
    pub fn shown(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            show: true,
        }
    }
}

/// Body of `POST /qr/generate-contact`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactQrRequest {
    pub full_name: ContactField,
    pub phone_number: ContactField,
    pub address: ContactField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<ContactField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<ContactField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<ContactField>,
    #[serde(default)]
    pub send_location_on_scan: bool,
    pub size: u32,
    pub error_correction: ErrorCorrectionLevel,
    pub border: u32,
    pub foreground_color: String,
    pub background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

impl ContactQrRequest {
    pub fn new(full_name: &str, phone_number: &str, address: &str) -> Self {
        Self {
            full_name: ContactField::shown(full_name),
            phone_number: ContactField::shown(phone_number),
            address: ContactField::shown(address),
            email: None,
            company: None,
            website: None,
            send_location_on_scan: false,
            size: DEFAULT_QR_SIZE,
            error_correction: ErrorCorrectionLevel::default(),
            border: DEFAULT_BORDER,
            foreground_color: DEFAULT_FOREGROUND.to_string(),
            background_color: DEFAULT_BACKGROUND.to_string(),
            logo_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Full name", &self.full_name.value)?;
        require("Phone number", &self.phone_number.value)?;
        require("Address", &self.address.value)
    }
}

/// Body of `POST /qr/generate-pdf-link`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfLinkQrRequest {
    pub pdf_path: String,
    pub size: u32,
    pub error_correction: ErrorCorrectionLevel,
    pub border: u32,
    pub foreground_color: String,
    pub background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

impl PdfLinkQrRequest {
    pub fn new(pdf_path: impl Into<String>) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            size: DEFAULT_QR_SIZE,
            error_correction: ErrorCorrectionLevel::default(),
            border: DEFAULT_BORDER,
            foreground_color: DEFAULT_FOREGROUND.to_string(),
            background_color: DEFAULT_BACKGROUND.to_string(),
            logo_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("PDF path", &self.pdf_path)
    }
}

/// Response of `POST /upload-pdf`
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedPdf {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_request_defaults() {
        let req = QrCodeRequest::text("  Jane Doe ");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["content"], "Jane Doe");
        assert_eq!(json["qr_type"], "text");
        assert_eq!(json["size"], 512);
        assert_eq!(json["error_correction"], "M");
        assert_eq!(json["border"], 4);
        assert_eq!(json["foreground_color"], "#000000");
        assert!(json.get("logo_url").is_none());
    }

    #[test]
    fn test_qr_type_wire_names() {
        assert_eq!(serde_json::to_string(&QrCodeType::ContactQr).unwrap(), "\"contact_qr\"");
        assert_eq!(serde_json::to_string(&QrCodeType::Wifi).unwrap(), "\"wifi\"");
    }

    #[test]
    fn test_error_correction_from_str() {
        assert_eq!("h".parse::<ErrorCorrectionLevel>().unwrap(), ErrorCorrectionLevel::H);
        assert!("X".parse::<ErrorCorrectionLevel>().is_err());
    }

    #[test]
    fn test_empty_content_rejected() {
        assert_eq!(
            QrCodeRequest::text("   ").validate(),
            Err(ValidationError::Required("Content"))
        );
    }

    #[test]
    fn test_contact_required_fields() {
        assert!(ContactQrRequest::new("Jane", "555-0100", "1 Main St").validate().is_ok());
        assert_eq!(
            ContactQrRequest::new("Jane", "", "1 Main St").validate(),
            Err(ValidationError::Required("Phone number"))
        );
        assert_eq!(
            ContactQrRequest::new("Jane", "555-0100", " ").validate(),
            Err(ValidationError::Required("Address"))
        );
    }

    #[test]
    fn test_image_base64_strips_data_url() {
        let resp: QrCodeResponse = serde_json::from_str(
            r#"{"success": true, "qr_code_data": "data:image/png;base64,iVBORw0KGgo=", "qr_id": "q1"}"#,
        )
        .unwrap();
        assert_eq!(resp.image_base64(), Some("iVBORw0KGgo="));
        assert_eq!(resp.view_url, None);
    }
}
