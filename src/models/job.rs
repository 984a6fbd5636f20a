use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Ceiling applied when the caller omits `max_attempts` or passes a non-positive value.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Priority applied when the caller omits one. Lower values are served first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs can never be claimed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A unit of deferred work tracked by the job store.
///
/// Serializes to the wire shape returned to polling clients. Lease bookkeeping
/// stays internal to the store and worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub queue_name: String,
    pub job_type: String,
    pub organization_id: Uuid,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip)]
    pub run_at: DateTime<Utc>,
    #[serde(skip)]
    pub lease_token: Option<Uuid>,
    #[serde(skip)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// The lease held on this job, if it is currently claimed.
    pub fn lease(&self) -> Option<Lease> {
        match (self.status, self.lease_token) {
            (JobStatus::Processing, Some(token)) => Some(Lease {
                job_id: self.id,
                token,
            }),
            _ => None,
        }
    }
}

/// Proof of ownership handed out by a claim. Every later transition on the
/// job must present the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub job_id: Uuid,
    pub token: Uuid,
}

/// Optional knobs accepted by `enqueue`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub priority: Option<i32>,
    pub max_attempts: Option<i32>,
}

impl EnqueueOptions {
    pub fn priority(self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    pub fn max_attempts(self) -> i32 {
        match self.max_attempts {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// A job about to be inserted. Built through [`NewJob::new`], which serializes
/// the payload and rejects empty routing keys.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue_name: String,
    pub job_type: String,
    pub organization_id: Uuid,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_attempts: i32,
}

impl NewJob {
    pub fn new<P: Serialize>(
        queue_name: &str,
        job_type: &str,
        organization_id: Uuid,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<Self, NewJobError> {
        if queue_name.trim().is_empty() {
            return Err(NewJobError::EmptyQueueName);
        }
        if job_type.trim().is_empty() {
            return Err(NewJobError::EmptyJobType);
        }

        let payload = serde_json::to_value(payload).map_err(NewJobError::Payload)?;
        if !payload.is_object() {
            return Err(NewJobError::PayloadNotObject);
        }

        Ok(Self {
            queue_name: queue_name.to_string(),
            job_type: job_type.to_string(),
            organization_id,
            payload,
            priority: options.priority(),
            max_attempts: options.max_attempts(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NewJobError {
    #[error("queue_name must not be empty")]
    EmptyQueueName,

    #[error("job_type must not be empty")]
    EmptyJobType,

    #[error("payload could not be serialized: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("payload must be a string-keyed map")]
    PayloadNotObject,
}

/// Outcome reported by a worker when a job attempt does not succeed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub message: String,
    /// Whether another attempt may help. Non-retriable failures are terminal
    /// on the current attempt.
    pub retriable: bool,
    /// Delay before the job becomes claimable again when it is retried.
    pub retry_after: std::time::Duration,
}
