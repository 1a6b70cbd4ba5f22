//! Generation types
//!
//! Request and response bodies for the KoboldCpp generation endpoints.

use serde::{Deserialize, Serialize};

/// Sampling parameters sent alongside every prompt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum context window the server should consider
    pub max_context_length: u32,
    /// Maximum number of tokens to generate
    pub max_length: u32,
    /// Temperature parameter for text generation
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_context_length: 2048,
            max_length: 100,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// Body of `POST /api/v1/generate` and `POST /api/extra/generate/stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_context_length: u32,
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationRequest {
    /// Build a request for `prompt` using the given sampling parameters
    pub fn new(prompt: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            prompt: prompt.into(),
            max_context_length: params.max_context_length,
            max_length: params.max_length,
            temperature: params.temperature,
            top_p: params.top_p,
        }
    }
}

/// Body returned by `POST /api/v1/generate`
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResponse {
    #[serde(default)]
    pub results: Vec<GenerationResult>,
}

/// One completed generation
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationResult {
    pub text: String,
}

impl GenerationResponse {
    /// Text of the first result, if the server returned any
    pub fn into_first_text(self) -> Option<String> {
        self.results.into_iter().next().map(|r| r.text)
    }
}
