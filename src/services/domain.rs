use async_trait::async_trait;
use uuid::Uuid;

use crate::models::photo::{Photo, SafetyCode};
use crate::models::violation::{NewDetectedViolation, ViolationWrite};

/// Persistence for the domain entities the photo analysis handler reads and writes.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, DomainError>;

    async fn list_safety_codes(&self) -> Result<Vec<SafetyCode>, DomainError>;

    async fn get_safety_code_by_code(&self, code: &str) -> Result<Option<SafetyCode>, DomainError>;

    /// Insert a violation. Inserting an id that already exists is a no-op
    /// reported as [`ViolationWrite::AlreadyExists`].
    async fn create_detected_violation(
        &self,
        violation: &NewDetectedViolation,
    ) -> Result<ViolationWrite, DomainError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Domain store unavailable: {0}")]
    Unavailable(String),
}
