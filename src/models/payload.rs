use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Queue served by the photo analysis workers.
pub const PHOTO_ANALYSIS_QUEUE: &str = "photo_analysis";

/// Every job kind the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    AnalyzePhoto,
}

/// Payload of an `analyze_photo` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AnalyzePhotoPayload {
    #[garde(skip)]
    pub photo_id: Uuid,

    /// Extra free text forwarded to the AI service.
    #[garde(length(max = 2000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspection_context: Option<String>,
}

/// Decoded job payload, one variant per [`JobType`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    AnalyzePhoto(AnalyzePhotoPayload),
}

impl JobPayload {
    /// Decode and validate the raw payload stored with a job.
    pub fn decode(job_type: JobType, raw: &serde_json::Value) -> Result<Self, PayloadError> {
        match job_type {
            JobType::AnalyzePhoto => {
                let payload: AnalyzePhotoPayload = serde_json::from_value(raw.clone())?;
                payload.validate()?;
                Ok(JobPayload::AnalyzePhoto(payload))
            }
        }
    }

    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::AnalyzePhoto(_) => JobType::AnalyzePhoto,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Invalid(#[from] garde::Report),
}
