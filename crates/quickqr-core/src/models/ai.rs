use serde::{Deserialize, Serialize};

use super::{require, QrCodeType, ValidationError};

/// Longest prompt accepted by the content generator
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Body of `POST /ai/suggestions`
#[derive(Debug, Clone, Serialize)]
pub struct AiSuggestionRequest {
    pub content: String,
    pub qr_type: QrCodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AiSuggestionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Content", &self.content)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiSuggestionResponse {
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub optimized_content: Option<String>,
    #[serde(default)]
    pub confidence_score: f64,
}

/// Body of `POST /ai/analyze` (public)
#[derive(Debug, Clone, Serialize)]
pub struct ContentAnalysisRequest {
    pub content: String,
    pub qr_type: QrCodeType,
}

/// Body of `POST /ai/generate-content`
#[derive(Debug, Clone, Serialize)]
pub struct ContentGenerationRequest {
    pub prompt: String,
    pub include_images: bool,
}

impl ContentGenerationRequest {
    pub fn new(prompt: &str, include_images: bool) -> Self {
        Self {
            prompt: prompt.trim().to_string(),
            include_images,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("Prompt", &self.prompt)?;
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ValidationError::TooLong {
                field: "Prompt",
                max: MAX_PROMPT_CHARS,
            });
        }
        Ok(())
    }
}
