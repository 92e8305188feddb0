use serde::{Deserialize, Serialize};

use super::{require, ValidationError};

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Body of `POST /auth/google`
#[derive(Debug, Clone, Serialize)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

/// Body of `POST /auth/register`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Email", &self.email)?;
        require("Password", &self.password)
    }
}

/// Check the password form before it is submitted
pub fn validate_credentials(username: &str, password: &str) -> Result<(), ValidationError> {
    require("Username", username)?;
    require("Password", password)
}
