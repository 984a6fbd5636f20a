//! Worker pool that claims jobs from the store and runs their handlers.
//!
//! Each worker handles one job at a time. A job runs in its own task so that a
//! panic or a blown deadline is contained. While it runs, the worker renews the
//! lease so the reaper leaves it alone. If the worker dies the lease lapses and
//! the reaper hands the job back to the queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::models::job::{Job, JobFailure, JobStatus, Lease};
use crate::models::payload::JobPayload;
use crate::services::audit::{AuditAction, AuditEvent, AuditSink};
use crate::services::notify::JobNotifier;
use crate::services::queue::{ClaimPolicy, JobStore, QueueError, RetryPolicy};
use crate::services::registry::{HandlerRegistry, JobError};

/// Floor for timer periods; `tokio::time::interval` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_name: String,
    pub workers: usize,
    /// Longest idle wait between claims.
    pub poll_interval: Duration,
    /// Deadline for a single handler invocation.
    pub job_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub claim: ClaimPolicy,
    pub retry: RetryPolicy,
}

/// How a single execution ended, from the worker's point of view.
enum Execution {
    Finished(Result<serde_json::Value, JobError>),
    /// The lease was taken away mid-run; the job is no longer ours to report on.
    Abandoned,
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    notifier: Arc<dyn JobNotifier>,
    audit: Option<AuditSink>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        notifier: Arc<dyn JobNotifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            audit: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: AuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run the worker pool and the reaper until `cancel` fires.
    ///
    /// Workers finish their in-flight job before exiting.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            queue = %self.config.queue_name,
            workers = self.config.workers,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Dispatcher started"
        );

        let mut tasks = JoinSet::new();
        for worker_id in 0..self.config.workers.max(1) {
            let dispatcher = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { dispatcher.worker_loop(worker_id, cancel).await });
        }
        {
            let dispatcher = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { dispatcher.reaper_loop(cancel).await });
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        tracing::info!(queue = %self.config.queue_name, "Dispatcher stopped");
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        tracing::debug!(worker_id, "Worker started");

        while !cancel.is_cancelled() {
            match self.process_next().await {
                Ok(true) => {
                    tracing::debug!(worker_id, "Job processed, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!(worker_id, "No jobs available, waiting");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        woke = self.notifier.wait(&self.config.queue_name, self.config.poll_interval) => {
                            if let Err(e) = woke {
                                tracing::warn!(worker_id, error = %e, "Notifier wait failed, falling back to polling");
                                sleep(self.config.poll_interval).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "Error processing job, will retry");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        tracing::debug!(worker_id, "Worker stopped");
    }

    async fn reaper_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reaper_interval.max(MIN_TICK));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.store.reap_expired(&self.config.queue_name).await {
                        Ok(0) => {}
                        Ok(n) => {
                            metrics::counter!("jobs_reaped_total", "queue" => self.config.queue_name.clone()).increment(n);
                            tracing::warn!(queue = %self.config.queue_name, reaped = n, "Recovered jobs with expired leases");
                        }
                        Err(e) => tracing::error!(error = %e, "Reaper sweep failed"),
                    }
                }
            }
        }
    }

    /// Claim and run the next job.
    /// Returns Ok(true) if a job was processed, Ok(false) if none was available.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let job = match self
            .store
            .claim(&self.config.queue_name, &self.config.claim)
            .await?
        {
            Some(j) => j,
            None => return Ok(false),
        };
        let lease = job
            .lease()
            .ok_or_else(|| QueueError::Mapping(format!("claimed job {} has no lease", job.id)))?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            organization_id = %job.organization_id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "Processing job"
        );

        let start = std::time::Instant::now();
        let execution = self.execute(&job, &lease).await;
        metrics::histogram!("job_duration_seconds", "job_type" => job.job_type.clone())
            .record(start.elapsed().as_secs_f64());

        match execution {
            Execution::Finished(Ok(result)) => self.report_success(&job, &lease, result).await?,
            Execution::Finished(Err(e)) => self.report_failure(&job, &lease, e).await?,
            Execution::Abandoned => {
                tracing::warn!(job_id = %job.id, "Lease lost during execution, abandoning job");
            }
        }

        Ok(true)
    }

    async fn execute(&self, job: &Job, lease: &Lease) -> Execution {
        let Some((job_type, handler)) = self.registry.resolve(&job.job_type) else {
            return Execution::Finished(Err(JobError::NoHandler(job.job_type.clone())));
        };

        let payload = match JobPayload::decode(job_type, &job.payload) {
            Ok(p) => p,
            Err(e) => return Execution::Finished(Err(JobError::Validation(e.to_string()))),
        };

        let mut task = {
            let job = job.clone();
            tokio::spawn(async move { handler.handle(&job, payload).await })
        };

        let deadline = sleep(self.config.job_timeout);
        tokio::pin!(deadline);
        let beat = self.config.heartbeat_interval.max(MIN_TICK);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + beat, beat);

        loop {
            tokio::select! {
                joined = &mut task => {
                    return Execution::Finished(match joined {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => {
                            let panic = e.into_panic();
                            let detail = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_default();
                            tracing::error!(job_id = %job.id, panic = %detail, "Handler panicked");
                            Err(JobError::Panicked)
                        }
                        Err(_) => Err(JobError::Transient("handler task was cancelled".to_string())),
                    });
                }
                _ = &mut deadline => {
                    task.abort();
                    return Execution::Finished(Err(JobError::DeadlineExceeded(self.config.job_timeout)));
                }
                _ = heartbeat.tick() => {
                    match self.store.heartbeat(lease, self.config.claim.lease).await {
                        Ok(()) => {}
                        Err(QueueError::LeaseLost(_)) | Err(QueueError::NotFound(_)) => {
                            task.abort();
                            return Execution::Abandoned;
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %job.id, error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        }
    }

    async fn report_success(
        &self,
        job: &Job,
        lease: &Lease,
        result: serde_json::Value,
    ) -> Result<(), QueueError> {
        match self.store.complete(lease, result).await {
            Ok(done) => {
                metrics::counter!("jobs_completed_total", "job_type" => done.job_type.clone()).increment(1);
                tracing::info!(job_id = %done.id, attempts = done.attempts, "Job completed successfully");
                self.audit(&done, AuditAction::JobCompleted);
                Ok(())
            }
            Err(QueueError::LeaseLost(id)) => {
                tracing::warn!(job_id = %id, "Lease lost before completion could be recorded");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record job completion");
                Err(e)
            }
        }
    }

    async fn report_failure(&self, job: &Job, lease: &Lease, error: JobError) -> Result<(), QueueError> {
        let failure = JobFailure {
            message: error.to_string(),
            retriable: error.is_retriable(),
            retry_after: self.config.retry.delay_for(job.attempts),
        };

        tracing::error!(
            job_id = %job.id,
            error = %error,
            error_kind = error.kind(),
            retriable = failure.retriable,
            "Job processing failed"
        );

        let after = match self.store.fail(lease, &failure).await {
            Ok(after) => after,
            Err(QueueError::LeaseLost(id)) => {
                tracing::warn!(job_id = %id, "Lease lost before failure could be recorded");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match after.status {
            JobStatus::Pending => {
                metrics::counter!("jobs_retried_total", "job_type" => after.job_type.clone()).increment(1);
                tracing::warn!(
                    job_id = %after.id,
                    attempts = after.attempts,
                    retry_in_ms = failure.retry_after.as_millis() as u64,
                    "Job re-queued for retry"
                );
                self.audit(&after, AuditAction::JobRetried);
            }
            _ => {
                metrics::counter!("jobs_failed_total", "job_type" => after.job_type.clone(), "kind" => error.kind()).increment(1);
                tracing::warn!(
                    job_id = %after.id,
                    attempts = after.attempts,
                    "Job failed permanently"
                );
                self.audit(&after, AuditAction::JobFailed);
            }
        }

        Ok(())
    }

    fn audit(&self, job: &Job, action: AuditAction) {
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::for_job(job, action));
        }
    }
}
