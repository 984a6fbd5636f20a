use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::analysis::{
    AnalysisRequest, PhotoAnalysisOutcome, ReportedViolation, SafetyCodeContext,
};
use crate::models::job::Job;
use crate::models::payload::{AnalyzePhotoPayload, JobPayload};
use crate::models::photo::Photo;
use crate::models::violation::{Confidence, NewDetectedViolation, Severity, ViolationWrite};
use crate::services::ai::AiService;
use crate::services::domain::{DomainError, DomainStore};
use crate::services::registry::{JobError, JobHandler};
use crate::services::storage::PhotoUrls;

/// Runs `analyze_photo` jobs: asks the AI service about one photo and stores
/// every violation it reports.
pub struct PhotoAnalysisHandler {
    domain: Arc<dyn DomainStore>,
    ai: Arc<dyn AiService>,
    photos: Arc<dyn PhotoUrls>,
}

impl PhotoAnalysisHandler {
    pub fn new(
        domain: Arc<dyn DomainStore>,
        ai: Arc<dyn AiService>,
        photos: Arc<dyn PhotoUrls>,
    ) -> Self {
        Self { domain, ai, photos }
    }

    async fn analyze(
        &self,
        job: &Job,
        payload: &AnalyzePhotoPayload,
    ) -> Result<PhotoAnalysisOutcome, JobError> {
        let photo = self
            .domain
            .get_photo(payload.photo_id)
            .await
            .map_err(transient)?
            .ok_or_else(|| JobError::NotFound(format!("photo {}", payload.photo_id)))?;

        let safety_codes = self.domain.list_safety_codes().await.map_err(transient)?;

        let image_url = self
            .photos
            .photo_url(&photo.storage_key)
            .await
            .map_err(|e| JobError::Transient(e.to_string()))?;

        let request = AnalysisRequest {
            image_url,
            safety_codes: safety_codes.iter().map(SafetyCodeContext::from).collect(),
            inspection_context: inspection_context(&photo, payload.inspection_context.as_deref()),
        };

        tracing::debug!(
            job_id = %job.id,
            photo_id = %photo.id,
            safety_codes = request.safety_codes.len(),
            "Calling AI service"
        );
        let start = std::time::Instant::now();
        let analysis = self
            .ai
            .analyze_photo(&request)
            .await
            .map_err(|e| JobError::Transient(e.to_string()))?;

        tracing::info!(
            job_id = %job.id,
            photo_id = %photo.id,
            ai_duration_ms = start.elapsed().as_millis() as u64,
            violations = analysis.violations.len(),
            tokens_used = analysis.tokens_used,
            "AI analysis complete"
        );

        let mut stored = 0;
        let mut already_stored = 0;
        let mut failed = 0;
        let mut code_ids: HashMap<String, Option<Uuid>> = HashMap::new();

        for (position, reported) in analysis.violations.iter().enumerate() {
            match self
                .store_violation(job, &photo, position, reported, &mut code_ids)
                .await
            {
                Ok(ViolationWrite::Created) => stored += 1,
                Ok(ViolationWrite::AlreadyExists) => already_stored += 1,
                Err(e) => {
                    // Partial write: one bad row must not sink the others.
                    failed += 1;
                    tracing::warn!(
                        job_id = %job.id,
                        photo_id = %photo.id,
                        error = %e,
                        "Failed to persist detected violation, skipping"
                    );
                }
            }
        }

        metrics::counter!("violations_stored_total").increment(stored as u64);

        Ok(PhotoAnalysisOutcome {
            violations_detected: analysis.violations.len(),
            violations_stored: stored,
            violations_already_stored: already_stored,
            violations_failed: failed,
            tokens_used: analysis.tokens_used,
            analysis_details: analysis.analysis_details,
        })
    }

    async fn store_violation(
        &self,
        job: &Job,
        photo: &Photo,
        position: usize,
        reported: &ReportedViolation,
        code_ids: &mut HashMap<String, Option<Uuid>>,
    ) -> Result<ViolationWrite, DomainError> {
        let reported_code = reported
            .safety_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let safety_code_id = match reported_code {
            Some(code) => self.resolve_code(job, code, code_ids).await,
            None => None,
        };

        let location = reported
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());

        let violation = NewDetectedViolation {
            id: NewDetectedViolation::derive_id(
                job.id,
                photo.id,
                position,
                &reported.description,
                reported_code,
                location,
            ),
            photo_id: photo.id,
            description: reported.description.trim().to_string(),
            confidence_score: Confidence::from_f64(reported.confidence),
            safety_code_id,
            severity: Severity::from_reported(&reported.severity),
            location: location.map(str::to_string),
        };

        let write = self.domain.create_detected_violation(&violation).await?;
        if write == ViolationWrite::AlreadyExists {
            tracing::debug!(
                job_id = %job.id,
                violation_id = %violation.id,
                "Violation already stored by an earlier attempt"
            );
        }
        Ok(write)
    }

    /// Match a reported code string. A miss or a lookup error leaves the
    /// violation without a safety code.
    async fn resolve_code(
        &self,
        job: &Job,
        code: &str,
        cache: &mut HashMap<String, Option<Uuid>>,
    ) -> Option<Uuid> {
        if let Some(hit) = cache.get(code) {
            return *hit;
        }

        let resolved = match self.domain.get_safety_code_by_code(code).await {
            Ok(found) => found.map(|sc| sc.id),
            Err(e) => {
                tracing::warn!(job_id = %job.id, code, error = %e, "Safety code lookup failed");
                return None;
            }
        };

        if resolved.is_none() {
            tracing::info!(job_id = %job.id, code, "Reported safety code has no match");
        }
        cache.insert(code.to_string(), resolved);
        resolved
    }
}

#[async_trait]
impl JobHandler for PhotoAnalysisHandler {
    async fn handle(&self, job: &Job, payload: JobPayload) -> Result<serde_json::Value, JobError> {
        let JobPayload::AnalyzePhoto(payload) = payload;
        let outcome = self.analyze(job, &payload).await?;
        serde_json::to_value(&outcome).map_err(|e| JobError::Transient(e.to_string()))
    }
}

fn transient(e: DomainError) -> JobError {
    JobError::Transient(e.to_string())
}

fn inspection_context(photo: &Photo, extra: Option<&str>) -> String {
    let mut context = format!(
        "Construction site inspection {} photo {}.",
        photo.inspection_id, photo.id
    );
    if let Some(caption) = photo.caption.as_deref().filter(|c| !c.trim().is_empty()) {
        context.push_str(" Caption: ");
        context.push_str(caption.trim());
        context.push('.');
    }
    if let Some(extra) = extra.filter(|e| !e.trim().is_empty()) {
        context.push(' ');
        context.push_str(extra.trim());
    }
    context
}
