use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{Job, JobFailure, JobStatus, Lease, NewJob};
use crate::services::queue::{ClaimPolicy, JobStore, QueueError};

/// Job store held in process memory.
///
/// Every operation runs under one lock, so claims are trivially atomic. Used
/// by the test suite and for running a worker without Postgres.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    /// Creation stamps are kept strictly increasing so FIFO ties never fall
    /// back to id order.
    last_created: Option<DateTime<Utc>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, oldest first.
    pub async fn all_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut all: Vec<Job> = state.jobs.values().cloned().collect();
        all.sort_by_key(|job| job.created_at);
        all
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

fn leased_job<'a>(
    jobs: &'a mut HashMap<Uuid, Job>,
    lease: &Lease,
) -> Result<&'a mut Job, QueueError> {
    let job = jobs
        .get_mut(&lease.job_id)
        .ok_or(QueueError::NotFound(lease.job_id))?;
    if job.status != JobStatus::Processing || job.lease_token != Some(lease.token) {
        return Err(QueueError::LeaseLost(lease.job_id));
    }
    Ok(job)
}

fn release(job: &mut Job, now: DateTime<Utc>) {
    job.lease_token = None;
    job.lease_expires_at = None;
    job.updated_at = now;
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, new_job: NewJob) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let created_at = match state.last_created {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        state.last_created = Some(created_at);

        let job = Job {
            id: Uuid::new_v4(),
            queue_name: new_job.queue_name,
            job_type: new_job.job_type,
            organization_id: new_job.organization_id,
            status: JobStatus::Pending,
            payload: new_job.payload,
            priority: new_job.priority,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            error_message: None,
            result: None,
            created_at,
            updated_at: created_at,
            run_at: now,
            lease_token: None,
            lease_expires_at: None,
        };

        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.state
            .lock()
            .await
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn claim(&self, queue_name: &str, policy: &ClaimPolicy) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let jobs = &mut state.jobs;

        let mut busy: HashMap<Uuid, u32> = HashMap::new();
        for job in jobs.values() {
            if job.queue_name == queue_name && job.status == JobStatus::Processing {
                *busy.entry(job.organization_id).or_default() += 1;
            }
        }

        let next_id = jobs
            .values()
            .filter(|job| {
                job.queue_name == queue_name
                    && job.status == JobStatus::Pending
                    && job.run_at <= now
                    && job.attempts < job.max_attempts
                    && busy.get(&job.organization_id).copied().unwrap_or(0)
                        < policy.org_concurrency_limit
            })
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|job| job.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.lease_token = Some(Uuid::new_v4());
        job.lease_expires_at = Some(now + chrono_duration(policy.lease));
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn heartbeat(&self, lease: &Lease, extend_by: Duration) -> Result<(), QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let jobs = &mut state.jobs;
        let job = leased_job(jobs, lease)?;
        job.lease_expires_at = Some(now + chrono_duration(extend_by));
        job.updated_at = now;
        Ok(())
    }

    async fn complete(&self, lease: &Lease, result: serde_json::Value) -> Result<Job, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let jobs = &mut state.jobs;
        let job = leased_job(jobs, lease)?;
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.error_message = None;
        release(job, now);
        Ok(job.clone())
    }

    async fn fail(&self, lease: &Lease, failure: &JobFailure) -> Result<Job, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let jobs = &mut state.jobs;
        let job = leased_job(jobs, lease)?;

        if failure.retriable && job.attempts < job.max_attempts {
            job.status = JobStatus::Pending;
            job.run_at = now + chrono_duration(failure.retry_after);
        } else {
            job.status = JobStatus::Failed;
        }
        job.error_message = Some(failure.message.clone());
        release(job, now);
        Ok(job.clone())
    }

    async fn reap_expired(&self, queue_name: &str) -> Result<u64, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let jobs = &mut state.jobs;
        let mut reaped = 0;

        for job in jobs.values_mut() {
            let expired = job.queue_name == queue_name
                && job.status == JobStatus::Processing
                && job.lease_expires_at.is_some_and(|at| at <= now);
            if !expired {
                continue;
            }

            if job.attempts < job.max_attempts {
                job.status = JobStatus::Pending;
                job.run_at = now;
            } else {
                job.status = JobStatus::Failed;
            }
            job.error_message = Some("Lease expired before the job finished".to_string());
            release(job, now);
            reaped += 1;
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::EnqueueOptions;
    use serde_json::json;

    fn new_job(org: Uuid, priority: i32, max_attempts: i32) -> NewJob {
        NewJob::new(
            "photo_analysis",
            "analyze_photo",
            org,
            &json!({"photo_id": Uuid::new_v4().to_string()}),
            EnqueueOptions {
                priority: Some(priority),
                max_attempts: Some(max_attempts),
            },
        )
        .unwrap()
    }

    fn failure(retriable: bool) -> JobFailure {
        JobFailure {
            message: "AI service timed out".into(),
            retriable,
            retry_after: Duration::ZERO,
        }
    }

    fn wide_policy() -> ClaimPolicy {
        ClaimPolicy {
            lease: Duration::from_secs(60),
            org_concurrency_limit: 100,
        }
    }

    #[tokio::test]
    async fn enqueued_job_is_pending_with_no_attempts() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let fetched = store.get_job(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.attempts, 0);
        assert_eq!(fetched.max_attempts, 3);
    }

    #[tokio::test]
    async fn get_job_reports_missing_ids() {
        let store = InMemoryJobStore::new();
        let missing = Uuid::new_v4();
        assert!(matches!(store.get_job(missing).await, Err(QueueError::NotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn claims_by_priority_then_age() {
        let store = InMemoryJobStore::new();
        let org = Uuid::new_v4();
        let late_low = store.enqueue(new_job(org, 20, 3)).await.unwrap();
        let first_urgent = store.enqueue(new_job(org, 1, 3)).await.unwrap();
        let second_urgent = store.enqueue(new_job(org, 1, 3)).await.unwrap();

        let order: Vec<Uuid> = [
            store.claim("photo_analysis", &wide_policy()).await.unwrap(),
            store.claim("photo_analysis", &wide_policy()).await.unwrap(),
            store.claim("photo_analysis", &wide_policy()).await.unwrap(),
        ]
        .into_iter()
        .map(|job| job.unwrap().id)
        .collect();

        assert_eq!(order, vec![first_urgent.id, second_urgent.id, late_low.id]);
        assert!(store.claim("photo_analysis", &wide_policy()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_ignores_other_queues() {
        let store = InMemoryJobStore::new();
        store.enqueue(new_job(Uuid::new_v4(), 1, 3)).await.unwrap();
        assert!(store.claim("reports", &wide_policy()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn busy_organization_does_not_starve_others() {
        let store = InMemoryJobStore::new();
        let big = Uuid::new_v4();
        let small = Uuid::new_v4();
        for _ in 0..5 {
            store.enqueue(new_job(big, 1, 3)).await.unwrap();
        }
        let small_job = store.enqueue(new_job(small, 50, 3)).await.unwrap();

        let policy = ClaimPolicy {
            lease: Duration::from_secs(60),
            org_concurrency_limit: 2,
        };
        let a = store.claim("photo_analysis", &policy).await.unwrap().unwrap();
        let b = store.claim("photo_analysis", &policy).await.unwrap().unwrap();
        let c = store.claim("photo_analysis", &policy).await.unwrap().unwrap();

        assert_eq!(a.organization_id, big);
        assert_eq!(b.organization_id, big);
        assert_eq!(c.id, small_job.id);
        assert!(store.claim("photo_analysis", &policy).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retriable_failure_requeues_until_attempts_run_out() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(new_job(Uuid::new_v4(), 5, 2)).await.unwrap();

        let claimed = store.claim("photo_analysis", &wide_policy()).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        let after = store.fail(&claimed.lease().unwrap(), &failure(true)).await.unwrap();
        assert_eq!(after.status, JobStatus::Pending);
        assert_eq!(after.attempts, 1);
        assert_eq!(after.error_message.as_deref(), Some("AI service timed out"));

        let claimed = store.claim("photo_analysis", &wide_policy()).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts, 2);
        let after = store.fail(&claimed.lease().unwrap(), &failure(true)).await.unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.attempts, 2);

        assert!(store.claim("photo_analysis", &wide_policy()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_retriable_failure_is_terminal_immediately() {
        let store = InMemoryJobStore::new();
        store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let claimed = store.claim("photo_analysis", &wide_policy()).await.unwrap().unwrap();
        let after = store.fail(&claimed.lease().unwrap(), &failure(false)).await.unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.attempts, 1);
    }

    #[tokio::test]
    async fn backoff_delays_the_next_claim() {
        let store = InMemoryJobStore::new();
        store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let claimed = store.claim("photo_analysis", &wide_policy()).await.unwrap().unwrap();
        let delayed = JobFailure {
            retry_after: Duration::from_secs(3600),
            ..failure(true)
        };
        store.fail(&claimed.lease().unwrap(), &delayed).await.unwrap();

        assert!(store.claim("photo_analysis", &wide_policy()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_stores_result_and_is_terminal() {
        let store = InMemoryJobStore::new();
        store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let claimed = store.claim("photo_analysis", &wide_policy()).await.unwrap().unwrap();
        let lease = claimed.lease().unwrap();
        let done = store
            .complete(&lease, json!({"violations_detected": 2}))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(json!({"violations_detected": 2})));

        // The lease died with the transition.
        assert!(matches!(
            store.fail(&lease, &failure(true)).await,
            Err(QueueError::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn reaper_recovers_expired_leases() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let expired = ClaimPolicy {
            lease: Duration::ZERO,
            org_concurrency_limit: 10,
        };
        let claimed = store.claim("photo_analysis", &expired).await.unwrap().unwrap();
        let stale = claimed.lease().unwrap();

        assert_eq!(store.reap_expired("photo_analysis").await.unwrap(), 1);
        let reaped = store.get_job(job.id).await.unwrap();
        assert_eq!(reaped.status, JobStatus::Pending);
        assert_eq!(reaped.attempts, 1);

        // The worker that lost its lease can no longer touch the job.
        assert!(matches!(
            store.complete(&stale, json!({})).await,
            Err(QueueError::LeaseLost(_))
        ));
        assert!(matches!(
            store.heartbeat(&stale, Duration::from_secs(30)).await,
            Err(QueueError::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn reaper_fails_jobs_with_no_attempts_left() {
        let store = InMemoryJobStore::new();
        let job = store.enqueue(new_job(Uuid::new_v4(), 5, 1)).await.unwrap();

        let expired = ClaimPolicy {
            lease: Duration::ZERO,
            org_concurrency_limit: 10,
        };
        store.claim("photo_analysis", &expired).await.unwrap().unwrap();
        store.reap_expired("photo_analysis").await.unwrap();

        let reaped = store.get_job(job.id).await.unwrap();
        assert_eq!(reaped.status, JobStatus::Failed);
        assert_eq!(reaped.attempts, 1);
        assert!(reaped.error_message.is_some());
    }

    #[tokio::test]
    async fn heartbeat_keeps_live_leases_out_of_the_reaper() {
        let store = InMemoryJobStore::new();
        store.enqueue(new_job(Uuid::new_v4(), 5, 3)).await.unwrap();

        let expired = ClaimPolicy {
            lease: Duration::ZERO,
            org_concurrency_limit: 10,
        };
        let claimed = store.claim("photo_analysis", &expired).await.unwrap().unwrap();
        store
            .heartbeat(&claimed.lease().unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.reap_expired("photo_analysis").await.unwrap(), 0);
    }
}
