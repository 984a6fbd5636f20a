use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobFailure, JobStatus, Lease, NewJob};
use crate::services::queue::{ClaimPolicy, JobStore, QueueError};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, queue_name, job_type, organization_id, payload, status, priority, \
    attempts, max_attempts, error_message, result, run_at, lease_token, \
    lease_expires_at, created_at, updated_at";

/// Postgres-backed job store.
///
/// Claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... RETURNING`
/// so concurrent workers never receive the same row. Lease-guarded transitions
/// match on `lease_token` and report `LeaseLost` when nothing matched.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a lease-guarded update matched no row.
    async fn lease_miss(&self, lease: &Lease) -> QueueError {
        match sqlx::query_scalar::<_, Uuid>("SELECT id FROM jobs WHERE id = $1")
            .bind(lease.job_id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => QueueError::LeaseLost(lease.job_id),
            Ok(None) => QueueError::NotFound(lease.job_id),
            Err(e) => QueueError::Database(e),
        }
    }
}

fn row_to_job(row: &PgRow) -> Result<Job, QueueError> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|_| QueueError::Mapping(format!("unknown status: {status_str}")))?;

    Ok(Job {
        id: row.try_get("id")?,
        queue_name: row.try_get("queue_name")?,
        job_type: row.try_get("job_type")?,
        organization_id: row.try_get("organization_id")?,
        status,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        max_attempts: row.try_get("max_attempts")?,
        error_message: row.try_get("error_message")?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        run_at: row.try_get("run_at")?,
        lease_token: row.try_get("lease_token")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError> {
        let query = format!(
            "INSERT INTO jobs (id, queue_name, job_type, organization_id, payload, status, priority, max_attempts) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&job.queue_name)
            .bind(&job.job_type)
            .bind(job.organization_id)
            .bind(&job.payload)
            .bind(job.priority)
            .bind(job.max_attempts)
            .fetch_one(&self.pool)
            .await?;

        row_to_job(&row)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => row_to_job(&r),
            None => Err(QueueError::NotFound(job_id)),
        }
    }

    async fn claim(&self, queue_name: &str, policy: &ClaimPolicy) -> Result<Option<Job>, QueueError> {
        // The per-organization count is read in the same statement as the
        // claim. Under heavy contention two workers can both see room for one
        // more job, so the limit is a soft bound.
        let query = format!(
            "UPDATE jobs \
             SET status = 'processing', attempts = attempts + 1, \
                 lease_token = $2, \
                 lease_expires_at = NOW() + make_interval(secs => $3), \
                 updated_at = NOW() \
             WHERE id = ( \
                 SELECT j.id FROM jobs j \
                 WHERE j.queue_name = $1 \
                   AND j.status = 'pending' \
                   AND j.run_at <= NOW() \
                   AND j.attempts < j.max_attempts \
                   AND ( \
                       SELECT COUNT(*) FROM jobs p \
                       WHERE p.queue_name = j.queue_name \
                         AND p.organization_id = j.organization_id \
                         AND p.status = 'processing' \
                   ) < $4 \
                 ORDER BY j.priority ASC, j.created_at ASC, j.id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(queue_name)
            .bind(Uuid::new_v4())
            .bind(policy.lease.as_secs_f64())
            .bind(i64::from(policy.org_concurrency_limit))
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn heartbeat(&self, lease: &Lease, extend_by: Duration) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET lease_expires_at = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE id = $1 AND lease_token = $2 AND status = 'processing'",
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .bind(extend_by.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.lease_miss(lease).await);
        }
        Ok(())
    }

    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError> {
        let query = format!(
            "UPDATE jobs \
             SET status = 'completed', result = $3, error_message = NULL, \
                 lease_token = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND lease_token = $2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(lease.job_id)
            .bind(lease.token)
            .bind(&result)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => row_to_job(&r),
            None => Err(self.lease_miss(lease).await),
        }
    }

    async fn fail(&self, lease: &Lease, failure: &JobFailure) -> Result<Job, QueueError> {
        let query = format!(
            "UPDATE jobs \
             SET status = CASE WHEN $3 AND attempts < max_attempts THEN 'pending' ELSE 'failed' END, \
                 run_at = CASE WHEN $3 AND attempts < max_attempts \
                               THEN NOW() + make_interval(secs => $5) ELSE run_at END, \
                 error_message = $4, \
                 lease_token = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND lease_token = $2 AND status = 'processing' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(lease.job_id)
            .bind(lease.token)
            .bind(failure.retriable)
            .bind(&failure.message)
            .bind(failure.retry_after.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => row_to_job(&r),
            None => Err(self.lease_miss(lease).await),
        }
    }

    async fn reap_expired(&self, queue_name: &str) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END, \
                 run_at = NOW(), \
                 error_message = 'Lease expired before the job finished', \
                 lease_token = NULL, lease_expires_at = NULL, updated_at = NOW() \
             WHERE queue_name = $1 AND status = 'processing' AND lease_expires_at <= NOW()",
        )
        .bind(queue_name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
