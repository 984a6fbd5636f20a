use serde::{Deserialize, Serialize};

use crate::models::photo::SafetyCode;

/// Request body sent to the AI inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub image_url: String,
    pub safety_codes: Vec<SafetyCodeContext>,
    pub inspection_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyCodeContext {
    pub code: String,
    pub description: String,
    pub country: String,
}

impl From<&SafetyCode> for SafetyCodeContext {
    fn from(code: &SafetyCode) -> Self {
        Self {
            code: code.code.clone(),
            description: code.description.clone(),
            country: code.country.clone(),
        }
    }
}

/// Violations and usage reported by the AI service for one photo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub violations: Vec<ReportedViolation>,
    #[serde(default)]
    pub tokens_used: i64,
    #[serde(default)]
    pub analysis_details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportedViolation {
    pub description: String,
    #[serde(default)]
    pub safety_code: Option<String>,
    pub severity: String,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub location: Option<String>,
}

/// Aggregate returned by the photo analysis handler and stored as the job result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoAnalysisOutcome {
    pub violations_detected: usize,
    /// Rows newly written by this attempt.
    pub violations_stored: usize,
    /// Rows an earlier attempt of the same job already wrote.
    #[serde(default)]
    pub violations_already_stored: usize,
    pub violations_failed: usize,
    pub tokens_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_details: Option<String>,
}
