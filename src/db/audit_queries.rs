use async_trait::async_trait;
use sqlx::PgPool;

use crate::services::audit::{AuditEvent, AuditWriter};

/// Writes audit events into `audit_logs`.
pub struct PgAuditWriter {
    pool: PgPool,
}

impl PgAuditWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditWriter for PgAuditWriter {
    async fn write(&self, event: &AuditEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (organization_id, entity_type, entity_id, action, detail, occurred_at)
            VALUES ($1, 'job', $2, $3, $4, $5)
            "#,
        )
        .bind(event.organization_id)
        .bind(event.job_id)
        .bind(event.action.as_ref())
        .bind(&event.detail)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
