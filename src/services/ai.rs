use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::models::analysis::{AnalysisRequest, AnalysisResponse};

/// Stateless inference endpoint that looks for safety violations in a photo.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn analyze_photo(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AiError>;
}

/// HTTP client for the photo analysis inference service.
pub struct HttpAiClient {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpAiClient {
    pub fn new(endpoint: &str, api_token: Option<&str>, timeout: Duration) -> Result<Self, AiError> {
        let http = Client::builder()
            .user_agent(concat!("site-inspect-queue/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(AiError::Http)?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }
}

#[async_trait]
impl AiService for HttpAiClient {
    /// Send the photo URL and safety-code context, and parse the reported violations.
    async fn analyze_photo(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, AiError> {
        let url = format!("{}/v1/analyze-photo", self.endpoint);

        let mut builder = self.http.post(&url).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(AiError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status { status, body });
        }

        let body = response.bytes().await.map_err(AiError::Http)?;
        serde_json::from_slice(&body).map_err(AiError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI service returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to parse AI response: {0}")]
    Parse(#[from] serde_json::Error),
}
