use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
    JobEnqueued,
    JobCompleted,
    JobRetried,
    JobFailed,
}

/// A job lifecycle event destined for the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub organization_id: Uuid,
    pub job_id: Uuid,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn for_job(job: &Job, action: AuditAction) -> Self {
        Self {
            organization_id: job.organization_id,
            job_id: job.id,
            action,
            detail: serde_json::json!({
                "queue_name": job.queue_name,
                "job_type": job.job_type,
                "attempts": job.attempts,
                "error_message": job.error_message,
            }),
            occurred_at: Utc::now(),
        }
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditWriter: Send + Sync {
    async fn write(&self, event: &AuditEvent) -> Result<(), sqlx::Error>;
}

/// Bounded audit pipeline: a fixed-size queue drained by a fixed set of
/// writer tasks. When the queue is full new events are dropped and logged.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditSink {
    /// Start `workers` writer tasks behind a queue of `capacity` events.
    ///
    /// The tasks exit once every clone of the sink has been dropped and the
    /// queue is drained.
    pub fn spawn(
        writer: Arc<dyn AuditWriter>,
        capacity: usize,
        workers: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while taking one event.
                        let next = rx.lock().await.recv().await;
                        let Some(event) = next else { break };
                        if let Err(e) = writer.write(&event).await {
                            tracing::error!(
                                worker,
                                job_id = %event.job_id,
                                action = %event.action,
                                error = %e,
                                "Failed to write audit event"
                            );
                        }
                    }
                    tracing::debug!(worker, "Audit writer stopped");
                })
            })
            .collect();

        (Self { tx }, handles)
    }

    /// Queue an event without waiting. Returns `false` if it was dropped.
    pub fn record(&self, event: AuditEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::counter!("audit_events_dropped_total").increment(1);
                tracing::warn!(
                    job_id = %event.job_id,
                    action = %event.action,
                    "Audit queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(job_id = %event.job_id, "Audit sink closed, dropping event");
                false
            }
        }
    }
}
