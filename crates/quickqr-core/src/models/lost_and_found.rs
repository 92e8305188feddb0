use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require, ValidationError};

/// Body of `POST /lost-and-found/generate`
#[derive(Debug, Clone, Serialize)]
pub struct GenerateLostAndFoundRequest {
    pub name: String,
}

impl GenerateLostAndFoundRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Name", &self.name)
    }
}

/// Whether a detail is shown to the finder who scans the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldVisibility {
    Visible,
    Hidden,
}

/// Body of `POST /lost-and-found/update-details`
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateQrDetailsRequest {
    pub qr_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: String,
    pub address: String,
    pub address_location: String,
    pub description: String,
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeMap<String, FieldVisibility>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<bool>,
}

impl UpdateQrDetailsRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("QR id", &self.qr_id)?;
        require("First name", &self.first_name)?;
        require("Last name", &self.last_name)
    }
}

/// Body of `POST /lost-and-found/mark-found`
#[derive(Debug, Clone, Serialize)]
pub struct MarkFoundRequest {
    pub qr_id: String,
    pub user_id: String,
    pub found_location: String,
    pub found_date: DateTime<Utc>,
}

impl MarkFoundRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("QR id", &self.qr_id)?;
        require("User id", &self.user_id)?;
        require("Found location", &self.found_location)
    }
}

/// What a scan of a lost & found tag shows
#[derive(Debug, Clone, Deserialize)]
pub struct LostAndFoundView {
    #[serde(default)]
    pub is_first_scan: bool,
    pub qr_name: Option<String>,
    #[serde(default)]
    pub has_details: bool,
    #[serde(default)]
    pub can_edit: bool,
    pub ui_mode: Option<String>,
    pub details: Option<serde_json::Value>,
    pub message: Option<String>,
}

/// `{"success": ..., "message": ...}` acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_requires_name() {
        assert!(GenerateLostAndFoundRequest::new(" Backpack ").validate().is_ok());
        assert_eq!(GenerateLostAndFoundRequest::new(" Backpack ").name, "Backpack");
        assert_eq!(
            GenerateLostAndFoundRequest::new("  ").validate(),
            Err(ValidationError::Required("Name"))
        );
    }

    #[test]
    fn test_update_details_serializes_permissions() {
        let mut permissions = BTreeMap::new();
        permissions.insert("phone_number".to_string(), FieldVisibility::Hidden);
        let req = UpdateQrDetailsRequest {
            qr_id: "q1".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            permissions: Some(permissions),
            lock: Some(true),
            ..Default::default()
        };
        assert!(req.validate().is_ok());

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["permissions"]["phone_number"], "hidden");
        assert_eq!(json["lock"], true);
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn test_first_scan_view_parses() {
        let view: LostAndFoundView = serde_json::from_str(
            r#"{"is_first_scan": true, "qr_name": "Backpack", "message": "First time scan. Please update details.", "has_details": false, "can_edit": true, "ui_mode": "edit"}"#,
        )
        .unwrap();
        assert!(view.is_first_scan);
        assert!(view.can_edit);
        assert_eq!(view.ui_mode.as_deref(), Some("edit"));
        assert!(view.details.is_none());
    }
}
