use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::photo::{Photo, SafetyCode};
use crate::models::violation::{
    Confidence, DetectedViolation, NewDetectedViolation, Severity, ViolationStatus, ViolationWrite,
};
use crate::services::domain::{DomainError, DomainStore};

/// Postgres-backed domain store for photos, safety codes and detected violations.
#[derive(Clone)]
pub struct PgDomainStore {
    pool: PgPool,
}

impl PgDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainStore for PgDomainStore {
    async fn get_photo(&self, photo_id: Uuid) -> Result<Option<Photo>, DomainError> {
        let photo = sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, inspection_id, organization_id, storage_key, caption, created_at
            FROM photos
            WHERE id = $1
            "#,
        )
        .bind(photo_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(photo)
    }

    async fn list_safety_codes(&self) -> Result<Vec<SafetyCode>, DomainError> {
        let codes = sqlx::query_as::<_, SafetyCode>(
            "SELECT id, code, description, country FROM safety_codes ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    /// Case-insensitive match on the code string
    async fn get_safety_code_by_code(&self, code: &str) -> Result<Option<SafetyCode>, DomainError> {
        let found = sqlx::query_as::<_, SafetyCode>(
            r#"
            SELECT id, code, description, country
            FROM safety_codes
            WHERE LOWER(code) = LOWER($1)
            ORDER BY code
            LIMIT 1
            "#,
        )
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(found)
    }

    async fn create_detected_violation(
        &self,
        violation: &NewDetectedViolation,
    ) -> Result<ViolationWrite, DomainError> {
        // Confidence travels as the scaled integer and lands in NUMERIC(5,4).
        let result = sqlx::query(
            r#"
            INSERT INTO detected_violations
                (id, photo_id, description, confidence_score, safety_code_id, severity, location, status)
            VALUES ($1, $2, $3, $4::INTEGER::NUMERIC / 10000, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(violation.id)
        .bind(violation.photo_id)
        .bind(&violation.description)
        .bind(violation.confidence_score.scaled())
        .bind(violation.safety_code_id)
        .bind(violation.severity.to_string())
        .bind(violation.location.as_deref())
        .bind(ViolationStatus::Pending.to_string())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            ViolationWrite::Created
        } else {
            ViolationWrite::AlreadyExists
        })
    }
}

/// Read back the violations stored for a photo, oldest first.
pub async fn list_violations_for_photo(
    pool: &PgPool,
    photo_id: Uuid,
) -> Result<Vec<DetectedViolation>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, photo_id, description,
               (confidence_score * 10000)::INTEGER AS confidence_scaled,
               safety_code_id, severity, location, status, created_at
        FROM detected_violations
        WHERE photo_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(photo_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let severity: String = r.try_get("severity")?;
            let status: String = r.try_get("status")?;
            Ok(DetectedViolation {
                id: r.try_get("id")?,
                photo_id: r.try_get("photo_id")?,
                description: r.try_get("description")?,
                confidence_score: Confidence::from_scaled(r.try_get("confidence_scaled")?),
                safety_code_id: r.try_get("safety_code_id")?,
                severity: severity
                    .parse::<Severity>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                location: r.try_get("location")?,
                status: status
                    .parse::<ViolationStatus>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect()
}
