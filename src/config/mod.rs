use serde::Deserialize;
use std::time::Duration;

use crate::models::payload::PHOTO_ANALYSIS_QUEUE;
use crate::services::dispatcher::DispatcherConfig;
use crate::services::queue::{ClaimPolicy, RetryPolicy};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for worker wake-ups. Workers poll when unset.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Base URL of the photo analysis inference service
    pub ai_service_url: String,

    /// Bearer token for the inference service
    #[serde(default)]
    pub ai_api_token: Option<String>,

    #[serde(default = "default_ai_timeout_secs")]
    pub ai_timeout_secs: u64,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Lifetime of presigned photo URLs handed to the AI service
    #[serde(default = "default_photo_url_ttl_secs")]
    pub photo_url_ttl_secs: u32,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// Max `processing` jobs one organization may hold per queue
    #[serde(default = "default_org_concurrency_limit")]
    pub org_concurrency_limit: u32,

    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,

    #[serde(default = "default_retry_backoff_max_secs")]
    pub retry_backoff_max_secs: u64,

    #[serde(default = "default_audit_buffer")]
    pub audit_buffer: usize,

    #[serde(default = "default_audit_workers")]
    pub audit_workers: usize,

    /// Address for the worker's Prometheus listener. No exporter when unset.
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    60
}

fn default_photo_url_ttl_secs() -> u32 {
    900
}

fn default_queue_name() -> String {
    PHOTO_ANALYSIS_QUEUE.to_string()
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_lease_secs() -> u64 {
    60
}

fn default_heartbeat_secs() -> u64 {
    20
}

fn default_reaper_interval_secs() -> u64 {
    15
}

fn default_org_concurrency_limit() -> u32 {
    2
}

fn default_retry_backoff_base_secs() -> u64 {
    5
}

fn default_retry_backoff_max_secs() -> u64 {
    300
}

fn default_audit_buffer() -> usize {
    256
}

fn default_audit_workers() -> usize {
    2
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Worker pool settings for the configured queue.
    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_name: self.queue_name.clone(),
            workers: self.worker_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            reaper_interval: Duration::from_secs(self.reaper_interval_secs),
            claim: ClaimPolicy {
                lease: Duration::from_secs(self.lease_secs),
                org_concurrency_limit: self.org_concurrency_limit,
            },
            retry: RetryPolicy {
                base: Duration::from_secs(self.retry_backoff_base_secs),
                max: Duration::from_secs(self.retry_backoff_max_secs),
            },
        }
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }
}
