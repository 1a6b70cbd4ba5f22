//! Generation client
//!
//! Thin wrapper over the four KoboldCpp endpoints this application uses.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde_json::Value;

use super::stream::read_stream;
use super::{
    KoboldError, DEFAULT_BASE_URL, GENERATE_PATH, GENERATE_STREAM_PATH, MODEL_PATH, VERSION_PATH,
};
use crate::storage::settings::AppSettings;
use crate::types::generation::{GenerationParams, GenerationRequest, GenerationResponse};

/// HTTP client bound to one generation server
#[derive(Debug, Clone)]
pub struct KoboldClient {
    http: reqwest::Client,
    base_url: String,
    params: GenerationParams,
}

impl KoboldClient {
    /// Create a client for `base_url` with default sampling parameters
    pub fn new(base_url: impl Into<String>) -> Result<Self, KoboldError> {
        Self::build(base_url.into(), GenerationParams::default(), None)
    }

    /// Create a client from persisted settings
    pub fn from_settings(settings: &AppSettings) -> Result<Self, KoboldError> {
        Self::build(
            settings.base_url.clone(),
            settings.generation_params(),
            Some(Duration::from_secs(settings.connect_timeout_secs)),
        )
    }

    fn build(
        base_url: String,
        params: GenerationParams,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, KoboldError> {
        let mut builder = reqwest::Client::builder();
        // Only connecting is bounded; a generation may legitimately take minutes.
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;

        let base_url = base_url.trim().trim_end_matches('/');
        let base_url = if base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            base_url.to_string()
        };

        tracing::info!("Kobold client targeting {}", base_url);
        Ok(Self {
            http,
            base_url,
            params,
        })
    }

    /// Replace the sampling parameters sent with every prompt
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/v1/model`, returned verbatim
    pub async fn get_model_info(&self) -> Result<Value, KoboldError> {
        self.get_json(MODEL_PATH, "model").await
    }

    /// `GET /api/v1/info/version`, returned verbatim
    pub async fn get_version(&self) -> Result<Value, KoboldError> {
        self.get_json(VERSION_PATH, "version").await
    }

    async fn get_json(&self, path: &str, endpoint: &'static str) -> Result<Value, KoboldError> {
        let response = self.http.get(self.url(path)).send().await?;
        let response = handle_response(response, endpoint).await?;
        Ok(response.json().await?)
    }

    /// Generate a completion for `prompt` in one round trip.
    ///
    /// Returns the text of the first result.
    pub async fn generate_response(&self, prompt: &str) -> Result<String, KoboldError> {
        let payload = GenerationRequest::new(prompt, self.params);
        tracing::debug!("Sending request: {:?}", payload);

        let response = self
            .http
            .post(self.url(GENERATE_PATH))
            .json(&payload)
            .send()
            .await?;
        let response = handle_response(response, "generate").await?;

        let result: GenerationResponse = response.json().await?;
        tracing::debug!("Received response: {:?}", result);

        result
            .into_first_text()
            .ok_or(KoboldError::EmptyResults {
                endpoint: "generate",
            })
    }

    /// Generate a completion through the streaming endpoint.
    ///
    /// The body is consumed as it arrives; the concatenated tokens are returned.
    pub async fn generate_response_stream(&self, prompt: &str) -> Result<String, KoboldError> {
        self.generate_response_stream_with(prompt, |_| {}).await
    }

    /// Like [`generate_response_stream`](Self::generate_response_stream), also
    /// handing every token to `on_token` as soon as it is decoded.
    pub async fn generate_response_stream_with<F>(
        &self,
        prompt: &str,
        on_token: F,
    ) -> Result<String, KoboldError>
    where
        F: FnMut(&str),
    {
        let payload = GenerationRequest::new(prompt, self.params);
        tracing::debug!("Sending streaming request: {:?}", payload);

        let response = self
            .http
            .post(self.url(GENERATE_STREAM_PATH))
            .json(&payload)
            .send()
            .await?;
        let mut response = handle_response(response, "stream").await?;

        let status = response.status();
        if has_null_body(status) {
            return Err(KoboldError::StreamUnsupported {
                status: status.as_u16(),
            });
        }

        read_stream(&mut response, on_token).await
    }
}

/// Statuses for which a response never carries a body
fn has_null_body(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT | StatusCode::NOT_MODIFIED
    )
}

/// Turn a non-success status into [`KoboldError::Request`]
async fn handle_response(
    response: Response,
    endpoint: &'static str,
) -> Result<Response, KoboldError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(
                "API Error ({}): {}, and reading the body failed: {}",
                endpoint,
                status,
                e
            );
            return Err(e.into());
        }
    };
    tracing::warn!("API Error ({}): {}", endpoint, status);
    Err(KoboldError::Request {
        endpoint,
        status: status.as_u16(),
        body,
    })
}
