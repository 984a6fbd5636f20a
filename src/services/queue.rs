use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{EnqueueOptions, Job, JobFailure, Lease, NewJob, NewJobError};
use crate::services::audit::{AuditAction, AuditEvent, AuditSink};
use crate::services::notify::JobNotifier;

/// Rules applied by `claim` when picking the next job.
#[derive(Debug, Clone, Copy)]
pub struct ClaimPolicy {
    /// How long the claimer owns the job before the reaper may take it back.
    pub lease: Duration,
    /// Maximum number of `processing` jobs one organization may hold in a queue.
    pub org_concurrency_limit: u32,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            org_concurrency_limit: 2,
        }
    }
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, given the attempts already made.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 16) as u32;
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// No delay at all; used by tests and local runs.
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(300),
        }
    }
}

/// Durable record of queued work and the only owner of job state transitions.
///
/// Implementations must make `claim` a single atomic step: two concurrent
/// callers never receive the same job. `heartbeat`, `complete` and `fail`
/// only act while the presented lease is still current.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job with zero attempts.
    async fn enqueue(&self, job: NewJob) -> Result<Job, QueueError>;

    /// Fetch a job by id.
    async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError>;

    /// Take ownership of the next eligible job in `queue_name`, if any.
    ///
    /// Eligible jobs are `pending`, past their `run_at`, and belong to an
    /// organization below the concurrency limit. Ordering is priority
    /// ascending, then creation time ascending.
    async fn claim(&self, queue_name: &str, policy: &ClaimPolicy) -> Result<Option<Job>, QueueError>;

    /// Extend the lease on a job still being worked on.
    async fn heartbeat(&self, lease: &Lease, extend_by: Duration) -> Result<(), QueueError>;

    /// `processing -> completed`, storing the handler result.
    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError>;

    /// `processing -> pending` when the failure is retriable and attempts
    /// remain, otherwise `processing -> failed`.
    async fn fail(&self, lease: &Lease, failure: &JobFailure) -> Result<Job, QueueError>;

    /// Return jobs whose lease expired to `pending`, or to `failed` when their
    /// attempts are used up. Returns how many jobs were touched.
    async fn reap_expired(&self, queue_name: &str) -> Result<u64, QueueError>;
}

/// Producer-facing API used by the HTTP layer.
#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn JobNotifier>,
    audit: Option<AuditSink>,
}

impl QueueClient {
    pub fn new(store: Arc<dyn JobStore>, notifier: Arc<dyn JobNotifier>) -> Self {
        Self {
            store,
            notifier,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Submit a job and wake an idle worker on its queue.
    pub async fn enqueue<P: serde::Serialize + ?Sized>(
        &self,
        queue_name: &str,
        job_type: &str,
        organization_id: Uuid,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Job, QueueError> {
        let new_job = NewJob::new(queue_name, job_type, organization_id, &payload, options)?;
        let job = self.store.enqueue(new_job).await?;

        metrics::counter!("jobs_enqueued_total", "queue" => job.queue_name.clone()).increment(1);
        tracing::info!(
            job_id = %job.id,
            queue = %job.queue_name,
            job_type = %job.job_type,
            organization_id = %job.organization_id,
            priority = job.priority,
            "Job enqueued"
        );
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::for_job(&job, AuditAction::JobEnqueued));
        }

        // A missed wake-up only costs one poll interval.
        if let Err(e) = self.notifier.notify(&job.queue_name).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to notify workers");
        }

        Ok(job)
    }

    /// Poll a job's current state.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store.get_job(job_id).await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn JobNotifier> {
        &self.notifier
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(#[from] NewJobError),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Lease on job {0} is no longer held")]
    LeaseLost(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job row: {0}")]
    Mapping(String),
}
