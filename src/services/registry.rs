use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::job::Job;
use crate::models::payload::{JobPayload, JobType};

/// Code registered for a [`JobType`] that performs the actual work.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of `job`. The payload has already been decoded and
    /// validated for the handler's job type.
    async fn handle(&self, job: &Job, payload: JobPayload) -> Result<serde_json::Value, JobError>;
}

/// Failure of a job attempt.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Malformed or missing payload field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A record the job refers to does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout or outage in a collaborator; worth another attempt.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("No handler registered for job type '{0}'")]
    NoHandler(String),

    #[error("Handler panicked")]
    Panicked,

    #[error("Execution deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl JobError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            JobError::Transient(_) | JobError::Panicked | JobError::DeadlineExceeded(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation",
            JobError::NotFound(_) => "not_found",
            JobError::Transient(_) => "transient",
            JobError::NoHandler(_) => "no_handler",
            JobError::Panicked => "panicked",
            JobError::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

/// Mapping from job type to handler, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type, handler);
        self
    }

    /// Look up the handler for a stored job-type string.
    pub fn resolve(&self, job_type: &str) -> Option<(JobType, Arc<dyn JobHandler>)> {
        let parsed: JobType = job_type.parse().ok()?;
        self.handlers
            .get(&parsed)
            .map(|handler| (parsed, handler.clone()))
    }

    pub fn job_types(&self) -> Vec<JobType> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn handle(&self, _job: &Job, _payload: JobPayload) -> Result<serde_json::Value, JobError> {
            Ok(serde_json::json!({}))
        }
    }

    #[test]
    fn resolves_registered_types_only() {
        let registry = HandlerRegistry::new().register(JobType::AnalyzePhoto, Arc::new(Noop));
        assert!(registry.resolve("analyze_photo").is_some());
        assert!(registry.resolve("generate_report").is_none());
        assert!(HandlerRegistry::new().resolve("analyze_photo").is_none());
    }

    #[test]
    fn retriability_follows_error_class() {
        assert!(JobError::Transient("503".into()).is_retriable());
        assert!(JobError::Panicked.is_retriable());
        assert!(!JobError::Validation("photo_id".into()).is_retriable());
        assert!(!JobError::NotFound("photo".into()).is_retriable());
        assert!(!JobError::NoHandler("x".into()).is_retriable());
    }
}
