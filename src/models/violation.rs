use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Severity of a detected violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Map a severity string reported by the AI service. Unknown labels land
    /// on `Medium` so the violation is still recorded for review.
    pub fn from_reported(raw: &str) -> Self {
        match raw.trim().parse::<Severity>() {
            Ok(severity) => severity,
            Err(_) => match raw.trim().to_ascii_lowercase().as_str() {
                "severe" | "urgent" => Severity::Critical,
                "moderate" => Severity::Medium,
                "minor" => Severity::Low,
                _ => Severity::Medium,
            },
        }
    }
}

/// Review state of a detected violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ViolationStatus {
    Pending,
    Confirmed,
    Dismissed,
}

/// Confidence score in `[0, 1]`, held as a fixed-point integer with four
/// fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Confidence(i32);

impl Confidence {
    pub const SCALE: i32 = 10_000;

    /// Convert a reported score. Out-of-range values are clamped and NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Confidence(0);
        }
        let clamped = value.clamp(0.0, 1.0);
        Confidence((clamped * Self::SCALE as f64).round() as i32)
    }

    /// Rebuild from the stored scaled integer.
    pub fn from_scaled(scaled: i32) -> Self {
        Confidence(scaled.clamp(0, Self::SCALE))
    }

    pub fn scaled(self) -> i32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl Serialize for Confidence {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Confidence::from_f64)
    }
}

/// A persisted violation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedViolation {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub description: String,
    pub confidence_score: Confidence,
    pub safety_code_id: Option<Uuid>,
    pub severity: Severity,
    pub location: Option<String>,
    pub status: ViolationStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert parameters for a violation. The id is derived by the caller so the
/// same violation from a retried job maps to the same row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetectedViolation {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub description: String,
    pub confidence_score: Confidence,
    pub safety_code_id: Option<Uuid>,
    pub severity: Severity,
    pub location: Option<String>,
}

impl NewDetectedViolation {
    /// Deterministic id scoped to the producing job. `position` is the
    /// violation's index in the AI response, so repeated findings in one
    /// response stay distinct rows.
    pub fn derive_id(
        job_id: Uuid,
        photo_id: Uuid,
        position: usize,
        description: &str,
        reported_code: Option<&str>,
        location: Option<&str>,
    ) -> Uuid {
        let key = format!(
            "{}|{}|{}|{}|{}",
            photo_id,
            position,
            normalize(description),
            normalize(reported_code.unwrap_or_default()),
            normalize(location.unwrap_or_default()),
        );
        Uuid::new_v5(&job_id, key.as_bytes())
    }
}

fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Result of a violation insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationWrite {
    Created,
    /// A row with the same id was already stored by an earlier attempt.
    AlreadyExists,
}
